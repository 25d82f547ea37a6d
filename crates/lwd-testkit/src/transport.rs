//! Scripted stand-ins for the hardware links.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lwd_config::{ControllerChannelConfig, ScaleChannelConfig};
use lwd_ingest::{ConnectorFactory, FrameStream, TransportConnector, TransportError};

/// What one `open()` does.
#[derive(Clone, Debug)]
pub enum Script {
    /// Fail immediately with `Unavailable`.
    Refuse,
    /// Never resolve; the probe timeout decides.
    Hang,
    /// Yield these frames, then either stay open and silent or close.
    Frames { frames: Vec<String>, hold_open: bool },
}

impl Script {
    /// Frames followed by a quiet but open link.
    pub fn frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Frames {
            frames: frames.into_iter().map(Into::into).collect(),
            hold_open: true,
        }
    }

    /// Frames followed by end of stream.
    pub fn then_close<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Frames {
            frames: frames.into_iter().map(Into::into).collect(),
            hold_open: false,
        }
    }
}

/// Per-channel sequence of scripts, consumed one per `open()`. Once the
/// queue is empty every further open uses `fallback`.
#[derive(Debug)]
pub struct ChannelScript {
    queue: Mutex<VecDeque<Script>>,
    fallback: Script,
    opens: AtomicUsize,
}

impl ChannelScript {
    pub fn new(scripts: Vec<Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(scripts.into()),
            fallback,
            opens: AtomicUsize::new(0),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(Vec::new(), Script::Refuse)
    }

    /// Number of `open()` calls seen so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn next(&self) -> Script {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct ScriptedConnector {
    name: &'static str,
    script: Arc<ChannelScript>,
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    fn describe(&self) -> String {
        format!("scripted:{}", self.name)
    }

    async fn open(&self) -> Result<Box<dyn FrameStream>, TransportError> {
        match self.script.next() {
            Script::Refuse => Err(TransportError::Unavailable {
                target: self.describe(),
                reason: "scripted refusal".to_string(),
            }),
            Script::Hang => std::future::pending().await,
            Script::Frames { frames, hold_open } => Ok(Box::new(ScriptedStream {
                frames: frames.into(),
                hold_open,
            })),
        }
    }
}

struct ScriptedStream {
    frames: VecDeque<String>,
    hold_open: bool,
}

#[async_trait]
impl FrameStream for ScriptedStream {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// `ConnectorFactory` backed by one [`ChannelScript`] per channel.
#[derive(Clone, Debug)]
pub struct ScriptedConnectors {
    pub controller: Arc<ChannelScript>,
    pub scale: Arc<ChannelScript>,
}

impl ScriptedConnectors {
    pub fn new(controller: Arc<ChannelScript>, scale: Arc<ChannelScript>) -> Self {
        Self { controller, scale }
    }

    /// No hardware anywhere.
    pub fn offline() -> Self {
        Self::new(ChannelScript::refusing(), ChannelScript::refusing())
    }
}

impl ConnectorFactory for ScriptedConnectors {
    fn controller(&self, _cfg: &ControllerChannelConfig) -> Box<dyn TransportConnector> {
        Box::new(ScriptedConnector {
            name: "controller",
            script: Arc::clone(&self.controller),
        })
    }

    fn scale(&self, _cfg: &ScaleChannelConfig) -> Box<dyn TransportConnector> {
        Box::new(ScriptedConnector {
            name: "scale",
            script: Arc::clone(&self.scale),
        })
    }
}
