use visionlink_stream::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("failed to spawn simulator thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
