//! Serialized frame writer.
//!
//! Each destination interface gets exactly one writer thread. Producers
//! hand it owned buffers over an unbounded queue, so writes never
//! interleave, and a slow or failing interface stalls neither the capture
//! loop feeding it nor the async runtime.

use std::io;
use std::thread;

use tokio::sync::mpsc;

use crate::capture::FrameSink;

/// Producer side of a frame writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    interface: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl WriterHandle {
    /// Queue a frame for transmission. Frames queued after the writer has
    /// shut down are dropped.
    pub fn enqueue(&self, frame: Vec<u8>) {
        if self.tx.send(frame).is_err() {
            tracing::debug!("{} writer closed, frame dropped", self.interface);
        }
    }
}

/// Spawn the writer thread for `sink`.
///
/// The thread runs until every `WriterHandle` is dropped, then drops the
/// sink.
pub fn spawn_writer(
    interface: &str,
    sink: Box<dyn FrameSink>,
) -> io::Result<(WriterHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let name = interface.to_string();
    let join = thread::Builder::new()
        .name(format!("writer-{}", interface))
        .spawn(move || write_loop(name, sink, rx))?;

    Ok((
        WriterHandle {
            interface: interface.to_string(),
            tx,
        },
        join,
    ))
}

fn write_loop(
    interface: String,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    tracing::debug!("{} writer started", interface);
    while let Some(frame) = rx.blocking_recv() {
        if let Err(e) = sink.write_frame(&frame) {
            tracing::warn!("Failed to send frame on {}: {}", interface, e);
        }
    }
    tracing::debug!("{} writer stopped", interface);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct FlakySink {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_on: u8,
        delay: Duration,
    }

    impl FrameSink for FlakySink {
        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            thread::sleep(self.delay);
            if frame.first() == Some(&self.fail_on) {
                return Err(io::Error::other("link down"));
            }
            self.written.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    fn sink(fail_on: u8, delay: Duration) -> (FlakySink, Arc<Mutex<Vec<Vec<u8>>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = FlakySink {
            written: written.clone(),
            fail_on,
            delay,
        };
        (sink, written)
    }

    #[test]
    fn test_writes_in_order_and_survives_failures() {
        let (sink, written) = sink(2, Duration::ZERO);

        let (handle, join) = spawn_writer("tap0", Box::new(sink)).unwrap();
        for i in 1..=4u8 {
            handle.enqueue(vec![i; 3]);
        }
        drop(handle);
        join.join().unwrap();

        assert_eq!(
            *written.lock().unwrap(),
            vec![vec![1; 3], vec![3; 3], vec![4; 3]]
        );
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = WriterHandle {
            interface: "eth0".to_string(),
            tx,
        };

        handle.enqueue(vec![9]);
        assert!(handle.tx.is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_interface_does_not_stall_runtime() {
        let (sink, written) = sink(0, Duration::from_millis(200));

        let (handle, join) = spawn_writer("tap0", Box::new(sink)).unwrap();
        for i in 1..=4u8 {
            handle.enqueue(vec![i]);
        }

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(150));

        drop(handle);
        tokio::task::spawn_blocking(move || join.join().unwrap())
            .await
            .unwrap();
        assert_eq!(written.lock().unwrap().len(), 4);
    }
}
