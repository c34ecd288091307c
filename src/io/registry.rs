use crate::config::QueueSpec;
use crate::error::{ClaimError, InitError};
use crate::io::spsc::{SpscQueue, SpscReceiver, SpscSender};
use ahash::AHashMap;
use std::any::{Any, type_name};

/// One named endpoint: its declared capacity plus whichever halves are
/// still waiting to be claimed. The element type is fixed by the first
/// claim; the opposite half must agree.
struct Endpoint {
    capacity: usize,
    elem: Option<&'static str>,
    sink: Option<Box<dyn Any + Send>>,
    source: Option<Box<dyn Any + Send>>,
    sink_owner: Option<String>,
    source_owner: Option<String>,
}

impl Endpoint {
    fn materialize<T: Send + 'static>(&mut self, name: &str) {
        if self.elem.is_some() {
            return;
        }
        let (tx, rx) = SpscQueue::bounded::<T>(name, self.capacity);
        self.sink = Some(Box::new(tx));
        self.source = Some(Box::new(rx));
        self.elem = Some(type_name::<T>());
    }

    fn check_elem<T>(&self, queue: &str) -> Result<(), ClaimError> {
        let stored = self.elem.unwrap_or("?");
        if stored != type_name::<T>() {
            return Err(ClaimError::WrongElementType {
                queue: queue.to_string(),
                stored,
                requested: type_name::<T>(),
            });
        }
        Ok(())
    }
}

/// Explicit registry of queue endpoints, owned by the module manager and
/// passed to module factories during topology construction. Never a
/// process-wide singleton.
///
/// Each half of a queue is handed out at most once; the two claimants are
/// the two modules the queue connects.
#[derive(Default)]
pub struct QueueRegistry {
    endpoints: AHashMap<String, Endpoint>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the queue set. Must run before any claim.
    pub fn configure(&mut self, specs: &[QueueSpec]) -> Result<(), InitError> {
        for spec in specs {
            if self.endpoints.contains_key(&spec.name) {
                return Err(InitError::DuplicateQueue {
                    name: spec.name.clone(),
                });
            }
            self.endpoints.insert(
                spec.name.clone(),
                Endpoint {
                    capacity: spec.capacity,
                    elem: None,
                    sink: None,
                    source: None,
                    sink_owner: None,
                    source_owner: None,
                },
            );
        }
        Ok(())
    }

    /// Claim the producing half of `queue` for `module`.
    pub fn sink<T: Send + 'static>(
        &mut self,
        queue: &str,
        module: &str,
    ) -> Result<SpscSender<T>, ClaimError> {
        let ep = self
            .endpoints
            .get_mut(queue)
            .ok_or_else(|| ClaimError::UnknownQueue {
                queue: queue.to_string(),
                module: module.to_string(),
            })?;

        ep.materialize::<T>(queue);
        ep.check_elem::<T>(queue)?;

        let half = ep.sink.take().ok_or_else(|| ClaimError::AlreadyClaimed {
            queue: queue.to_string(),
            end: "sink",
            by: ep.sink_owner.clone().unwrap_or_default(),
        })?;
        ep.sink_owner = Some(module.to_string());

        match half.downcast::<SpscSender<T>>() {
            Ok(tx) => Ok(*tx),
            Err(_) => Err(ClaimError::WrongElementType {
                queue: queue.to_string(),
                stored: ep.elem.unwrap_or("?"),
                requested: type_name::<T>(),
            }),
        }
    }

    /// Claim the consuming half of `queue` for `module`.
    pub fn source<T: Send + 'static>(
        &mut self,
        queue: &str,
        module: &str,
    ) -> Result<SpscReceiver<T>, ClaimError> {
        let ep = self
            .endpoints
            .get_mut(queue)
            .ok_or_else(|| ClaimError::UnknownQueue {
                queue: queue.to_string(),
                module: module.to_string(),
            })?;

        ep.materialize::<T>(queue);
        ep.check_elem::<T>(queue)?;

        let half = ep.source.take().ok_or_else(|| ClaimError::AlreadyClaimed {
            queue: queue.to_string(),
            end: "source",
            by: ep.source_owner.clone().unwrap_or_default(),
        })?;
        ep.source_owner = Some(module.to_string());

        match half.downcast::<SpscReceiver<T>>() {
            Ok(rx) => Ok(*rx),
            Err(_) => Err(ClaimError::WrongElementType {
                queue: queue.to_string(),
                stored: ep.elem.unwrap_or("?"),
                requested: type_name::<T>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::base::{QueueSink, QueueSource};

    fn specs(names: &[(&str, usize)]) -> Vec<QueueSpec> {
        names
            .iter()
            .map(|(n, c)| QueueSpec {
                name: n.to_string(),
                capacity: *c,
            })
            .collect()
    }

    #[test]
    fn claimed_halves_are_wired_together() {
        let mut reg = QueueRegistry::new();
        reg.configure(&specs(&[("frames", 4)])).unwrap();

        let mut tx = reg.sink::<u64>("frames", "producer").unwrap();
        let mut rx = reg.source::<u64>("frames", "consumer").unwrap();

        tx.push(7).unwrap();
        assert_eq!(rx.pop().unwrap(), 7);
    }

    #[test]
    fn duplicate_queue_declaration_is_fatal() {
        let mut reg = QueueRegistry::new();
        let err = reg
            .configure(&specs(&[("frames", 4), ("frames", 8)]))
            .unwrap_err();
        assert!(matches!(err, InitError::DuplicateQueue { name } if name == "frames"));
    }

    #[test]
    fn undeclared_queue_is_rejected() {
        let mut reg = QueueRegistry::new();
        reg.configure(&specs(&[("frames", 4)])).unwrap();
        let err = reg.sink::<u64>("missing", "producer").unwrap_err();
        assert!(matches!(err, ClaimError::UnknownQueue { queue, .. } if queue == "missing"));
    }

    #[test]
    fn each_half_claimed_once() {
        let mut reg = QueueRegistry::new();
        reg.configure(&specs(&[("frames", 4)])).unwrap();
        let _tx = reg.sink::<u64>("frames", "producer").unwrap();

        let err = reg.sink::<u64>("frames", "impostor").unwrap_err();
        assert!(
            matches!(err, ClaimError::AlreadyClaimed { end, by, .. } if end == "sink" && by == "producer")
        );
    }

    #[test]
    fn element_type_fixed_by_first_claim() {
        let mut reg = QueueRegistry::new();
        reg.configure(&specs(&[("frames", 4)])).unwrap();
        let _tx = reg.sink::<u64>("frames", "producer").unwrap();

        let err = reg.source::<String>("frames", "consumer").unwrap_err();
        assert!(matches!(err, ClaimError::WrongElementType { .. }));
    }
}
