// src/scene/mod.rs

//! Scene graph binding: how a bitmap reports changes to its compositor.
//!
//! A bitmap talks to the scene through [`SceneBinding`] and nothing else.
//! [`ChannelBinding`] forwards each call as a [`CompositionCommand`] to a
//! compositor thread started by [`spawn_compositor_thread`], which owns the
//! [`FrontBuffer`] and completes every copy it receives.
//!
//! Threading model:
//! - Owner thread: holds the bitmap and its binding, sends commands
//! - Compositor thread: owns the front buffer, sends `CompositorEvent`s back
//! - Commands use a bounded channel; events are unbounded so the compositor
//!   never blocks on a busy owner

#[cfg(test)]
mod tests;

use crate::config::CompositorConfig;
use crate::double_buffer::{BitmapDesc, FrontBuffer, PublishedFrame};
use crate::error::{ImagingError, Result};
use crate::geometry::PixelRect;
use anyhow::Context;
use log::*;
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};

/// What a bitmap needs from the scene graph.
pub trait SceneBinding: Send {
    /// A new frame is ready to be published.
    fn changed(&mut self) -> Result<()>;

    /// Ask to be told before the next batch commits.
    fn subscribe_before_commit(&mut self) -> Result<()>;

    fn unsubscribe_before_commit(&mut self) -> Result<()>;

    /// Contents changed outside the double-buffer protocol. `None` means all.
    fn invalidate(&mut self, region: Option<PixelRect>) -> Result<()>;

    /// Hands a published back buffer to the consumer.
    fn copy_forward(&mut self, frame: PublishedFrame) -> Result<()>;
}

/// Binding for bitmaps nobody renders. Copies complete immediately.
#[derive(Debug, Default)]
pub struct NullBinding;

impl SceneBinding for NullBinding {
    fn changed(&mut self) -> Result<()> {
        Ok(())
    }

    fn subscribe_before_commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn unsubscribe_before_commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn invalidate(&mut self, _region: Option<PixelRect>) -> Result<()> {
        Ok(())
    }

    fn copy_forward(&mut self, frame: PublishedFrame) -> Result<()> {
        frame.complete();
        Ok(())
    }
}

/// Messages from the owner thread to the compositor.
#[derive(Debug)]
pub enum CompositionCommand {
    Changed,
    SubscribeBeforeCommit,
    UnsubscribeBeforeCommit,
    Invalidate(Option<PixelRect>),
    CopyForward(PublishedFrame),
    Shutdown,
}

/// Messages from the compositor back to the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    FrameApplied { sequence: u64, rects: Vec<PixelRect> },
    Invalidated(Option<PixelRect>),
    ApplyFailed { sequence: u64, error: ImagingError },
}

/// Binding that forwards every call to a compositor thread.
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    tx: SyncSender<CompositionCommand>,
}

impl ChannelBinding {
    pub fn new(tx: SyncSender<CompositionCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: CompositionCommand) -> Result<()> {
        // A failed CopyForward drops the frame here, which returns the buffer.
        self.tx.send(command).map_err(|_| {
            warn!("ChannelBinding: compositor gone");
            ImagingError::ChannelClosed
        })
    }
}

impl SceneBinding for ChannelBinding {
    fn changed(&mut self) -> Result<()> {
        self.send(CompositionCommand::Changed)
    }

    fn subscribe_before_commit(&mut self) -> Result<()> {
        self.send(CompositionCommand::SubscribeBeforeCommit)
    }

    fn unsubscribe_before_commit(&mut self) -> Result<()> {
        self.send(CompositionCommand::UnsubscribeBeforeCommit)
    }

    fn invalidate(&mut self, region: Option<PixelRect>) -> Result<()> {
        self.send(CompositionCommand::Invalidate(region))
    }

    fn copy_forward(&mut self, frame: PublishedFrame) -> Result<()> {
        self.send(CompositionCommand::CopyForward(frame))
    }
}

/// Channels for talking to the compositor thread.
pub struct CompositorChannels {
    pub command_tx: SyncSender<CompositionCommand>,
    pub event_rx: Receiver<CompositorEvent>,
    handle: JoinHandle<FrontBuffer>,
}

impl CompositorChannels {
    /// A binding that feeds this compositor.
    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding::new(self.command_tx.clone())
    }

    /// Stops the thread and returns its front buffer.
    pub fn shutdown(self) -> anyhow::Result<FrontBuffer> {
        // The thread may already be gone; the join below reports that.
        let _ = self.command_tx.send(CompositionCommand::Shutdown);
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("Compositor thread panicked"))
    }
}

/// Compositor state (runs on dedicated thread)
struct Compositor {
    front: FrontBuffer,
    subscribed: bool,
    changes: u64,
}

impl Compositor {
    fn new(front: FrontBuffer) -> Self {
        Self {
            front,
            subscribed: false,
            changes: 0,
        }
    }

    /// Handle one command. Returns the event to report, if any.
    fn handle(&mut self, command: CompositionCommand) -> Option<CompositorEvent> {
        match command {
            CompositionCommand::Changed => {
                self.changes += 1;
                trace!("Compositor: change notification {}", self.changes);
                None
            }
            CompositionCommand::SubscribeBeforeCommit => {
                self.subscribed = true;
                None
            }
            CompositionCommand::UnsubscribeBeforeCommit => {
                self.subscribed = false;
                None
            }
            CompositionCommand::Invalidate(region) => {
                debug!("Compositor: invalidate {:?}", region);
                Some(CompositorEvent::Invalidated(region))
            }
            CompositionCommand::CopyForward(frame) => {
                let sequence = frame.sequence();
                let event = match self.front.apply(&frame) {
                    Ok(()) => CompositorEvent::FrameApplied {
                        sequence,
                        rects: frame.dirty_rects().to_vec(),
                    },
                    Err(error) => {
                        warn!("Compositor: failed to apply publish {}: {}", sequence, error);
                        CompositorEvent::ApplyFailed { sequence, error }
                    }
                };
                frame.complete();
                Some(event)
            }
            CompositionCommand::Shutdown => None,
        }
    }

    fn run(mut self, command_rx: Receiver<CompositionCommand>, event_tx: Sender<CompositorEvent>) -> FrontBuffer {
        info!("Compositor: Thread started");

        loop {
            match command_rx.recv() {
                Ok(CompositionCommand::Shutdown) => {
                    info!("Compositor: Shutdown requested");
                    break;
                }
                Ok(command) => {
                    if let Some(event) = self.handle(command) {
                        if event_tx.send(event).is_err() {
                            // Owner stopped listening; keep completing copies.
                            trace!("Compositor: event dropped, owner not listening");
                        }
                    }
                }
                Err(_) => {
                    info!("Compositor: Command channel closed, exiting");
                    break;
                }
            }
        }

        info!("Compositor: Thread stopped");
        self.front
    }
}

/// Spawn the compositor thread and return channels for communication
pub fn spawn_compositor_thread(
    desc: BitmapDesc,
    config: &CompositorConfig,
) -> anyhow::Result<CompositorChannels> {
    let front = FrontBuffer::new(desc).context("Invalid compositor front buffer")?;
    info!("spawn_compositor_thread: Creating channels");

    let (command_tx, command_rx) = sync_channel(config.channel_capacity);
    let (event_tx, event_rx) = channel();

    let handle = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || Compositor::new(front).run(command_rx, event_tx))
        .context("Failed to spawn compositor thread")?;

    info!("spawn_compositor_thread: Compositor thread spawned");

    Ok(CompositorChannels {
        command_tx,
        event_rx,
        handle,
    })
}
