#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    NotConnected,
    ConnectionFailed(String),
    Malformed(String),
    Closed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::NotConnected => write!(f, "tick source not connected"),
            FeedError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            FeedError::Malformed(msg) => write!(f, "malformed tick message: {}", msg),
            FeedError::Closed => write!(f, "tick stream closed"),
        }
    }
}

impl std::error::Error for FeedError {}
