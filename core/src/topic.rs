//! Topic name and filter validation

use hal_abstractions::MAX_TOPIC_LEN;
use heapless::String;

/// Topic validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopicError {
    Empty,
    TooLong,
    /// `+` or `#` in a topic name, or a malformed wildcard in a filter
    Wildcard,
    /// Embedded NUL character
    Nul,
}

impl core::fmt::Display for TopicError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty topic"),
            Self::TooLong => write!(f, "Topic too long"),
            Self::Wildcard => write!(f, "Invalid wildcard in topic"),
            Self::Nul => write!(f, "NUL character in topic"),
        }
    }
}

impl core::error::Error for TopicError {}

fn check_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::Nul);
    }
    Ok(())
}

/// Validate a topic name used for publishing. Wildcards are not allowed.
pub fn validate_name(topic: &str) -> Result<(), TopicError> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::Wildcard);
    }
    Ok(())
}

/// Validate a subscription filter.
///
/// `+` must occupy a whole level; `#` must occupy the last level.
pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
    check_common(filter)?;
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        match level {
            "+" => {}
            "#" if is_last => {}
            _ if level.contains(['+', '#']) => return Err(TopicError::Wildcard),
            _ => {}
        }
    }
    Ok(())
}

/// Build `device/{client_id}/{subtopic}`.
///
/// # Example
///
/// ```
/// let topic = broker_session::topic::format_topic("stm32f405-abc", "status").unwrap();
/// assert_eq!(topic.as_str(), "device/stm32f405-abc/status");
/// ```
pub fn format_topic(client_id: &str, subtopic: &str) -> Result<String<MAX_TOPIC_LEN>, TopicError> {
    for part in [client_id, subtopic] {
        if part.is_empty() {
            return Err(TopicError::Empty);
        }
        if part.contains(['+', '#']) {
            return Err(TopicError::Wildcard);
        }
        if part.contains('\0') {
            return Err(TopicError::Nul);
        }
    }

    let mut topic = String::<MAX_TOPIC_LEN>::new();
    topic.push_str("device/").map_err(|_| TopicError::TooLong)?;
    topic.push_str(client_id).map_err(|_| TopicError::TooLong)?;
    topic.push('/').map_err(|_| TopicError::TooLong)?;
    topic.push_str(subtopic).map_err(|_| TopicError::TooLong)?;
    Ok(topic)
}
