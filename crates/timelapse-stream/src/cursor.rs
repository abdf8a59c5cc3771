use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use timelapse_store::{read_frame_file, store_error, FrameStore};
use timelapse_types::{frame::FrameId, Result, TimelapseError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Pull cursor over the frames present when streaming began.
///
/// Each viewer owns its own cursor; cursors never lock the store, they only
/// react to files disappearing underneath them.
pub struct FrameCursor {
    store: FrameStore,
    looping: bool,
    traversal: Vec<FrameId>,
    position: usize,
    power: Option<watch::Receiver<bool>>,
    seen_on: bool,
}

impl FrameCursor {
    pub async fn open(store: FrameStore, looping: bool) -> Result<Self> {
        let traversal = list_frames(&store).await?;
        Ok(Self {
            store,
            looping,
            traversal,
            position: 0,
            power: None,
            seen_on: false,
        })
    }

    /// Ends the sequence once the watched power flag goes from `true` to
    /// `false`. A cursor opened while the flag is already `false` keeps
    /// replaying until the flag has been on at least once.
    pub fn with_power(mut self, power: watch::Receiver<bool>) -> Self {
        self.seen_on = *power.borrow();
        self.power = Some(power);
        self
    }

    pub fn traversal(&self) -> &[FrameId] {
        &self.traversal
    }

    fn powered(&mut self) -> bool {
        let Some(power) = &self.power else {
            return true;
        };
        if *power.borrow() {
            self.seen_on = true;
            true
        } else {
            !self.seen_on
        }
    }

    /// Next frame's bytes, or `None` once the sequence has ended.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        let mut unreadable = 0;
        loop {
            if !self.powered() {
                debug!("Camera switched off; ending frame sequence");
                return None;
            }
            if self.position >= self.traversal.len() {
                if !self.looping || self.traversal.is_empty() {
                    return None;
                }
                self.position = 0;
            }

            let id = self.traversal[self.position];
            match self.read(id).await {
                Ok(bytes) => {
                    self.position += 1;
                    return Some(Bytes::from(bytes));
                }
                Err(TimelapseError::MissingFrame(_)) => {
                    debug!("Frame {id} evicted mid-stream; rebuilding traversal");
                    if let Err(err) = self.rebuild_after(id).await {
                        warn!("Unable to rebuild frame traversal: {err}");
                        return None;
                    }
                }
                Err(err) => {
                    warn!("Skipping unreadable frame {id}: {err}");
                    self.position += 1;
                    unreadable += 1;
                    if unreadable > self.traversal.len() {
                        return None;
                    }
                }
            }
        }
    }

    async fn read(&self, id: FrameId) -> Result<Vec<u8>> {
        let path = self.store.frame_path(id);
        tokio::task::spawn_blocking(move || read_frame_file(&path, id))
            .await
            .map_err(|err| store_error(format!("frame read task failed: {err}")))?
    }

    /// Re-lists the store and resumes at the first frame newer than `vanished`.
    async fn rebuild_after(&mut self, vanished: FrameId) -> Result<()> {
        self.traversal = list_frames(&self.store).await?;
        self.position = self.traversal.partition_point(|id| *id <= vanished);
        Ok(())
    }
}

async fn list_frames(store: &FrameStore) -> Result<Vec<FrameId>> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.list_ordered())
        .await
        .map_err(|err| store_error(format!("frame listing task failed: {err}")))?
}

pub fn frame_stream(mut cursor: FrameCursor) -> BoxStream<'static, Bytes> {
    async_stream::stream! {
        while let Some(frame) = cursor.next_frame().await {
            yield frame;
        }
    }
    .boxed()
}
