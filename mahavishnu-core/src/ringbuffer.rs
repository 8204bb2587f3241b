//! Bounded byte ring buffer backing `stderr_tail` (default 4 KiB).

#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    data: std::collections::VecDeque<u8>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.data.len() == self.capacity {
                self.data.pop_front();
            }
            self.data.push_back(b);
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }
}

pub const DEFAULT_STDERR_TAIL_CAPACITY: usize = 4 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn keeps_only_the_most_recent_bytes() {
        let mut buf = RingBuffer::new(4);
        buf.push(b"abcdef");
        assert_eq!(buf.to_vec(), b"cdef".to_vec());
    }
}
