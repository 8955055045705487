//! Scroll position over the prewrapped transcript.
//!
//! The offset counts wrapped lines from the top. While `auto_scroll` is set
//! the view sticks to the bottom as new content streams in; any manual scroll
//! detaches it, and scrolling back to the bottom reattaches.

#[derive(Debug, Clone, Copy)]
pub struct ScrollState {
    pub offset: usize,
    pub auto_scroll: bool,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollState {
    pub fn new() -> Self {
        ScrollState {
            offset: 0,
            auto_scroll: true,
        }
    }

    pub fn max_offset(total_lines: usize, viewport_height: usize) -> usize {
        total_lines.saturating_sub(viewport_height)
    }

    /// Bring the offset back into range for the current content size, and
    /// follow the bottom while attached. Called once per frame before slicing
    /// the wrapped lines.
    pub fn clamp(&mut self, total_lines: usize, viewport_height: usize) {
        let max = Self::max_offset(total_lines, viewport_height);
        if self.auto_scroll {
            self.offset = max;
        } else {
            self.offset = self.offset.min(max);
        }
    }

    pub fn line_up(&mut self) {
        self.auto_scroll = false;
        self.offset = self.offset.saturating_sub(1);
    }

    pub fn line_down(&mut self, total_lines: usize, viewport_height: usize) {
        self.advance(1, total_lines, viewport_height);
    }

    pub fn page_up(&mut self, viewport_height: usize) {
        self.auto_scroll = false;
        self.offset = self.offset.saturating_sub(viewport_height.max(1));
    }

    pub fn page_down(&mut self, total_lines: usize, viewport_height: usize) {
        self.advance(viewport_height.max(1), total_lines, viewport_height);
    }

    pub fn scroll_to_top(&mut self) {
        self.auto_scroll = false;
        self.offset = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.auto_scroll = true;
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.auto_scroll = true;
    }

    fn advance(&mut self, step: usize, total_lines: usize, viewport_height: usize) {
        let max = Self::max_offset(total_lines, viewport_height);
        self.offset = self.offset.saturating_add(step).min(max);
        if self.offset >= max {
            self.auto_scroll = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_view_follows_the_bottom() {
        let mut scroll = ScrollState::new();
        scroll.clamp(50, 10);
        assert_eq!(scroll.offset, 40);

        scroll.clamp(80, 10);
        assert_eq!(scroll.offset, 70);
    }

    #[test]
    fn manual_scroll_detaches_from_the_bottom() {
        let mut scroll = ScrollState::new();
        scroll.clamp(50, 10);

        scroll.line_up();
        assert!(!scroll.auto_scroll);
        assert_eq!(scroll.offset, 39);

        // New content no longer drags the view down
        scroll.clamp(60, 10);
        assert_eq!(scroll.offset, 39);
    }

    #[test]
    fn reaching_the_bottom_reattaches() {
        let mut scroll = ScrollState::new();
        scroll.clamp(50, 10);
        scroll.page_up(10);
        assert!(!scroll.auto_scroll);

        scroll.page_down(50, 10);
        assert!(scroll.auto_scroll);
        assert_eq!(scroll.offset, 40);
    }

    #[test]
    fn offsets_clamp_when_content_shrinks() {
        let mut scroll = ScrollState::new();
        scroll.clamp(100, 10);
        scroll.line_up();
        assert_eq!(scroll.offset, 89);

        // Transcript cleared
        scroll.clamp(3, 10);
        assert_eq!(scroll.offset, 0);
    }

    #[test]
    fn short_content_never_scrolls() {
        let mut scroll = ScrollState::new();
        scroll.clamp(5, 10);
        assert_eq!(scroll.offset, 0);

        scroll.page_down(5, 10);
        assert_eq!(scroll.offset, 0);
        assert!(scroll.auto_scroll);
    }

    #[test]
    fn page_movements_saturate_at_the_edges() {
        let mut scroll = ScrollState::new();
        scroll.clamp(30, 10);
        scroll.page_up(10);
        scroll.page_up(10);
        scroll.page_up(10);
        assert_eq!(scroll.offset, 0);

        scroll.page_down(30, 10);
        scroll.page_down(30, 10);
        scroll.page_down(30, 10);
        assert_eq!(scroll.offset, 20);
    }

    #[test]
    fn jump_to_top_detaches_and_jump_to_bottom_reattaches() {
        let mut scroll = ScrollState::new();
        scroll.clamp(50, 10);

        scroll.scroll_to_top();
        assert_eq!(scroll.offset, 0);
        assert!(!scroll.auto_scroll);

        scroll.scroll_to_bottom();
        scroll.clamp(50, 10);
        assert_eq!(scroll.offset, 40);
        assert!(scroll.auto_scroll);
    }

    #[test]
    fn reset_returns_to_an_attached_top() {
        let mut scroll = ScrollState::new();
        scroll.clamp(50, 10);
        scroll.line_up();
        scroll.reset();
        assert_eq!(scroll.offset, 0);
        assert!(scroll.auto_scroll);
    }
}
