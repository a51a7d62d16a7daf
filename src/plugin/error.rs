use super::Capability;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{message}")]
    Failed { message: String },

    #[error("Plugin does not implement '{capability}'")]
    Unsupported { capability: Capability },

    #[error("Unknown member '{name}' on plugin '{plugin}'")]
    UnknownMember { plugin: String, name: String },

    #[error("Plugin panicked: {message}")]
    Panicked { message: String },

    #[error("Runtime call failed: {message}")]
    Runtime { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn unsupported(capability: Capability) -> Self {
        Self::Unsupported { capability }
    }

    /// Render a caught panic payload
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

impl From<crate::Error> for PluginError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Plugin(inner) => inner,
            other => Self::Runtime {
                message: other.to_string(),
            },
        }
    }
}
