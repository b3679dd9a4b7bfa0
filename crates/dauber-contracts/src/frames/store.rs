use super::Frame;

pub const MAX_FRAMES: usize = 20;

/// Bounded newest-first history of captured frames plus the comparison
/// selection. Selection holds an id only; a frame evicted from the history
/// simply stops resolving.
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    frames: Vec<Frame>,
    compare_frame_id: Option<String>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `frame` and drops anything past [`MAX_FRAMES`].
    pub fn push(&mut self, frame: Frame) {
        self.frames.insert(0, frame);
        self.frames.truncate(MAX_FRAMES);
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn get(&self, id: &str) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.id == id)
    }

    pub fn compare_frame_id(&self) -> Option<&str> {
        self.compare_frame_id.as_deref()
    }

    /// Sets the comparison frame. Selecting the current selection again
    /// clears it; `None` always clears.
    pub fn select_for_comparison(&mut self, id: Option<&str>) {
        self.compare_frame_id = match id {
            Some(id) if self.compare_frame_id.as_deref() == Some(id) => None,
            Some(id) => Some(id.to_string()),
            None => None,
        };
    }

    pub fn resolve_comparison_frame(&self) -> Option<&Frame> {
        self.compare_frame_id
            .as_deref()
            .and_then(|id| self.get(id))
    }

    pub fn clear_comparison(&mut self) {
        self.compare_frame_id = None;
    }

    pub fn clear_all(&mut self) {
        self.frames.clear();
        self.compare_frame_id = None;
    }
}
