use crossbeam_channel::Receiver;
use tracing::debug;

use crate::container::SealedContainer;
use crate::error::{Result, StrataError};
use crate::storage::ContainerStore;

/// Handle to a running container-writer thread.
pub struct ContainerWriter {
    handle: std::thread::JoinHandle<Result<()>>,
}

/// Spawn the writer thread for one upload session. It drains sealed
/// containers from the queue and persists each to the store, exiting once
/// every sender is dropped and the queue is empty. A write failure stops
/// the thread; containers written before the failure stay on disk.
pub fn spawn(rx: Receiver<SealedContainer>, store: ContainerStore) -> Result<ContainerWriter> {
    let handle = std::thread::Builder::new()
        .name("container-writer".into())
        .spawn(move || {
            let mut written = 0u64;
            for sealed in rx {
                store.write(&sealed)?;
                written += 1;
                debug!(container = %sealed.id, bytes = sealed.bytes.len(), "container written");
            }
            debug!(containers = written, "container queue drained");
            Ok(())
        })?;
    Ok(ContainerWriter { handle })
}

impl ContainerWriter {
    /// Wait for the writer to drain and exit. Call after dropping the
    /// session's sender so the loop can observe the close.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| StrataError::Other("container writer thread panicked".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_types::ContainerId;

    fn sealed(byte: u8, len: usize) -> SealedContainer {
        SealedContainer {
            id: ContainerId([byte; 8]),
            bytes: vec![byte; len],
        }
    }

    #[test]
    fn writes_all_queued_containers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::open(dir.path()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(4);

        let writer = spawn(rx, store.clone()).unwrap();
        for byte in [1u8, 2, 3] {
            tx.send(sealed(byte, 16)).unwrap();
        }
        drop(tx);
        writer.join().unwrap();

        for byte in [1u8, 2, 3] {
            assert_eq!(store.read(&ContainerId([byte; 8])).unwrap(), vec![byte; 16]);
        }
    }

    #[test]
    fn queue_of_one_blocks_producer_until_drained() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::open(dir.path()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<SealedContainer>(1);

        tx.send(sealed(1, 8)).unwrap();
        let producer_tx = tx.clone();
        let producer = std::thread::spawn(move || {
            producer_tx.send(sealed(2, 8)).unwrap();
        });

        // No consumer yet: the second send must be blocked on the full queue.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!producer.is_finished(), "producer should be blocked");

        let writer = spawn(rx, store.clone()).unwrap();
        producer.join().unwrap();
        drop(tx);
        writer.join().unwrap();

        assert!(store.exists(&ContainerId([1; 8])).unwrap());
        assert!(store.exists(&ContainerId([2; 8])).unwrap());
    }

    #[test]
    fn write_failure_surfaces_on_join() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("containers");
        let store = ContainerStore::open(&doomed).unwrap();
        std::fs::remove_dir_all(&doomed).unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let writer = spawn(rx, store).unwrap();
        tx.send(sealed(7, 8)).unwrap();
        drop(tx);

        assert!(writer.join().is_err());
    }
}
