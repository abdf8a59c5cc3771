use futures::stream::BoxStream;
use timelapse_types::{
    events::{CameraEvent, CameraEventKind},
    status::CameraStatus,
};

/// Capabilities the embedding host provides to a camera.
pub trait Host: Send + Sync + 'static {
    fn publish(&self, event: CameraEvent);

    fn notify_state_changed(&self, status: CameraStatus) {
        let camera = status.name.clone();
        self.publish(CameraEvent::new(
            camera,
            CameraEventKind::StateChanged {
                status: Box::new(status),
            },
        ));
    }

    /// Current value of a boolean entity, `None` when the host doesn't know it.
    fn read_external_signal(&self, id: &str) -> Option<bool>;

    /// Value changes of a boolean entity. May start with the current value.
    fn subscribe_signal(&self, id: &str) -> BoxStream<'static, bool>;
}
