pub mod key_strategy;
pub mod serializer;
pub mod writer;


pub use key_strategy::{KeyStrategy, PartitionKeyStrategy};
pub use serializer::{JsonSerializer, MessageSerializer, SerializationFormat, StringSerializer};
pub use writer::{Ack, KafkaWriter, KafkaWriterFactory, RecordWriter, WriterFactory};
