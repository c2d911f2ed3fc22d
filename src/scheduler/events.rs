// src/scheduler/events.rs - Out-of-band activation triggers
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

/// One trigger read from an external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPayload {
    pub source: String,
    /// Asset file name requested by the trigger; a random asset when `None`.
    pub asset: Option<String>,
}

#[async_trait]
pub trait ExternalEventSource: Send + Sync {
    /// Non-blocking check for a pending trigger. Consumes it when found.
    async fn poll(&mut self) -> io::Result<Option<TriggerPayload>>;
}

/// Simulated RFID reader: another process writes the marker string into a file,
/// and the reader clears the file once it has seen it.
///
/// Accepted contents are `<marker>` or `<marker>:<asset file name>`.
#[derive(Debug, Clone)]
pub struct SentinelFileSource {
    path: PathBuf,
    marker: String,
}

impl SentinelFileSource {
    pub fn new(path: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self { path: path.into(), marker: marker.into() }
    }

    pub fn parse_trigger(&self, contents: &str) -> Option<TriggerPayload> {
        let contents = contents.trim();
        let rest = contents.strip_prefix(self.marker.as_str())?;
        let asset = match rest.strip_prefix(':') {
            Some(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
            Some(_) => None,
            None if rest.is_empty() => None,
            None => return None,
        };
        Some(TriggerPayload { source: self.marker.clone(), asset })
    }
}

#[async_trait]
impl ExternalEventSource for SentinelFileSource {
    async fn poll(&mut self) -> io::Result<Option<TriggerPayload>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }

        tokio::fs::write(&self.path, b"").await?;
        let trigger = self.parse_trigger(&contents);
        if trigger.is_none() {
            tracing::warn!(
                "Ignoring unrecognised contents of {}: {:?}",
                self.path.display(),
                contents.trim()
            );
        }
        Ok(trigger)
    }
}
