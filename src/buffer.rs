/// A set of reusable buffers for MySQL protocol communication
///
/// `BackendConn` uses a single `BufferSet` for all its operations.
#[derive(Debug, Default)]
pub struct BufferSet {
    /// General-purpose read buffer
    /// Bytes are valid during an operation.
    pub read_buffer: Vec<u8>,

    /// Payload of the next outgoing packet, without frame headers.
    /// Bytes are valid during an operation.
    write_buffer: Vec<u8>,
}

impl BufferSet {
    /// Create a new empty buffer set
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the write buffer and return mutable access.
    #[inline]
    pub fn new_write_buffer(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    /// Get the write buffer for reading.
    #[inline]
    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Drop everything, keeping the allocations.
    pub fn clear(&mut self) {
        self.read_buffer.clear();
        self.write_buffer.clear();
    }
}
