use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};

use crate::error::Error;

/// Bumped whenever the global descriptor registry changes. Per-thread
/// caches compare their token against this counter and self-repair on
/// mismatch.
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Invalidates every thread's descriptor and parsed-message cache.
///
/// Call after registering new file descriptors into the global pool.
pub fn invalidate_all_caches() {
    GENERATION.fetch_add(1, Ordering::AcqRel);
}

/// Feeds an encoded `FileDescriptorSet` into the process-wide descriptor
/// registry and invalidates the per-thread caches.
pub fn load_file_descriptor_set(bytes: &[u8]) -> Result<(), prost_reflect::DescriptorError> {
    DescriptorPool::decode_global_file_descriptor_set(bytes)?;
    invalidate_all_caches();
    Ok(())
}

#[derive(Default)]
struct Cache {
    generation: u64,
    message_name: String,
    prototype: Option<MessageDescriptor>,
    payload: Vec<u8>,
    parsed: Option<DynamicMessage>,
    high_water: usize,
}

thread_local! {
    static CACHE: RefCell<Cache> = RefCell::new(Cache::default());
}

/// Resolves a fully qualified message name against the global registry,
/// memoizing the last hit per thread.
pub fn get_prototype(message_name: &str) -> Result<MessageDescriptor, Error> {
    CACHE.with(|cache| cache.borrow_mut().prototype_for(message_name))
}

/// Parses `payload` as `message_name` and hands the parsed message to `f`.
///
/// Byte-identical repeat payloads (the common case when a query extracts
/// several columns from the same row) reuse the previous parse.
pub fn with_message<R>(
    message_name: &str,
    payload: &[u8],
    f: impl FnOnce(&DynamicMessage) -> R,
) -> Result<R, Error> {
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let message = cache.parsed_message(message_name, payload)?;
        Ok(f(message))
    })
}

impl Cache {
    fn prototype_for(&mut self, message_name: &str) -> Result<MessageDescriptor, Error> {
        let generation = GENERATION.load(Ordering::Acquire);
        if self.generation == generation && self.message_name == message_name {
            if let Some(descriptor) = &self.prototype {
                return Ok(descriptor.clone());
            }
        }

        self.payload.clear();
        self.parsed = None;

        let Some(descriptor) = DescriptorPool::global().get_message_by_name(message_name) else {
            self.message_name.clear();
            self.prototype = None;
            return Err(Error::MessageDescriptorNotFound);
        };

        self.message_name.clear();
        self.message_name.push_str(message_name);
        self.prototype = Some(descriptor.clone());
        self.generation = generation;
        Ok(descriptor)
    }

    fn parsed_message(&mut self, message_name: &str, payload: &[u8]) -> Result<&DynamicMessage, Error> {
        let descriptor = self.prototype_for(message_name)?;

        if self.parsed.is_none() || self.payload != payload {
            // Reuse the previous instance unless this payload is much
            // smaller than what the instance has already absorbed; the
            // high-water mark caps arena growth from outlier payloads.
            let mut message = match self.parsed.take() {
                Some(mut message) if payload.len().saturating_mul(2) >= self.high_water => {
                    message.clear();
                    message
                }
                _ => DynamicMessage::new(descriptor),
            };

            if self.high_water < payload.len() {
                self.high_water = payload.len();
            }

            self.payload.clear();
            self.payload.extend_from_slice(payload);

            if message.merge(payload).is_err() {
                self.payload.clear();
                return Err(Error::ParseFailed);
            }

            return Ok(self.parsed.insert(message));
        }

        match &self.parsed {
            Some(message) => Ok(message),
            None => Err(Error::ParseFailed),
        }
    }
}
