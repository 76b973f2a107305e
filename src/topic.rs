use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identifies a topic by name and record type.
///
/// Descriptors are cheap lookup keys: two descriptors are equal when both the
/// name and the record type match.
///
/// ```rust
/// use topic_producer::TopicDescriptor;
///
/// let a = TopicDescriptor::<String>::of("test-topic");
/// let b = TopicDescriptor::<String>::of("test-topic");
/// assert_eq!(a, b);
/// ```
pub struct TopicDescriptor<T> {
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> TopicDescriptor<T> {
    pub fn of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> Clone for TopicDescriptor<T> {
    fn clone(&self) -> Self {
        Self::of(self.name.clone())
    }
}

impl<T> PartialEq for TopicDescriptor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.record_type() == other.record_type()
    }
}

impl<T> Eq for TopicDescriptor<T> {}

impl<T> Hash for TopicDescriptor<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.record_type().hash(state);
    }
}

impl<T> fmt::Debug for TopicDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDescriptor")
            .field("name", &self.name)
            .field("record_type", &self.record_type())
            .finish()
    }
}
