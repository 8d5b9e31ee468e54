use async_trait::async_trait;
use forge_protocol::OutputChannel;
use tokio::sync::mpsc;

/// [`OutputChannel`] backed by a bounded mpsc channel; the receiver side is
/// what an HTTP handler turns into a response body.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Option<mpsc::Sender<String>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

#[async_trait]
impl OutputChannel for ChannelSink {
    async fn push(&mut self, chunk: String) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        sender.send(chunk).await.is_ok()
    }

    async fn close(&mut self) {
        self.sender.take();
    }
}
