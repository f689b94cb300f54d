/// One staged outbound payload.
///
/// `size` is fixed at construction and always equals `content.len()`; the
/// buffer's byte accounting relies on it never being re-measured.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    content: Vec<u8>,
    size: usize,
    compressed: bool,
}

impl BufferedMessage {
    pub fn new(content: Vec<u8>, compressed: bool) -> Self {
        Self {
            size: content.len(),
            content,
            compressed,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
