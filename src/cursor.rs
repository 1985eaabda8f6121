//! Cyclic selection over the catalogue

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCommand {
    Forward,
    Backward,
}

/// Index into a list of `len` items, or nothing when the list is empty.
///
/// Invariant: `index` is `Some(i)` with `i < len` whenever `len > 0`,
/// and `None` when `len == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionCursor {
    index: Option<usize>,
    len: usize,
}

impl SelectionCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Index with -1 standing for "nothing selected"
    pub fn index_or_negative(&self) -> isize {
        self.index.map_or(-1, |i| i as isize)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid index range, for sliders and the like
    pub fn bounds(&self) -> Option<(usize, usize)> {
        (self.len > 0).then(|| (0, self.len - 1))
    }

    /// Re-clamp after the list changed size. Returns true if the index moved.
    pub fn rebound(&mut self, len: usize) -> bool {
        let before = self.index;
        self.len = len;
        self.index = match (self.index, len) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(i), len) => Some(i.min(len - 1)),
        };
        self.index != before
    }

    /// Advance, wrapping past the end to 0
    pub fn next(&mut self) -> bool {
        if self.len == 0 {
            return false;
        }
        let next = self.index.map_or(0, |i| (i + 1) % self.len);
        self.set(next)
    }

    /// Step back, wrapping before 0 to the last item
    pub fn previous(&mut self) -> bool {
        if self.len == 0 {
            return false;
        }
        let previous = match self.index {
            Some(0) | None => self.len - 1,
            Some(i) => i - 1,
        };
        self.set(previous)
    }

    pub fn cycle(&mut self, command: CycleCommand) -> bool {
        match command {
            CycleCommand::Forward => self.next(),
            CycleCommand::Backward => self.previous(),
        }
    }

    /// Jump to `index`, wrapping out-of-range values cyclically
    pub fn select(&mut self, index: isize) -> bool {
        if self.len == 0 {
            return false;
        }
        let wrapped = index.rem_euclid(self.len as isize) as usize;
        self.set(wrapped)
    }

    fn set(&mut self, index: usize) -> bool {
        let changed = self.index != Some(index);
        self.index = Some(index);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(len: usize) -> SelectionCursor {
        let mut cursor = SelectionCursor::new();
        cursor.rebound(len);
        cursor
    }

    #[test]
    fn test_empty_has_no_selection() {
        let mut cursor = cursor(0);
        assert_eq!(cursor.index(), None);
        assert_eq!(cursor.index_or_negative(), -1);
        assert_eq!(cursor.bounds(), None);
        assert!(!cursor.next());
        assert!(!cursor.previous());
        assert!(!cursor.select(3));
    }

    #[test]
    fn test_first_list_selects_zero() {
        let cursor = cursor(3);
        assert_eq!(cursor.index(), Some(0));
        assert_eq!(cursor.bounds(), Some((0, 2)));
    }

    #[test]
    fn test_next_wraps_to_start() {
        let mut cursor = cursor(3);
        cursor.select(2);
        assert!(cursor.next());
        assert_eq!(cursor.index(), Some(0));
    }

    #[test]
    fn test_previous_wraps_to_end() {
        let mut cursor = cursor(3);
        assert!(cursor.previous());
        assert_eq!(cursor.index(), Some(2));
        cursor.previous();
        assert_eq!(cursor.index(), Some(1));
    }

    #[test]
    fn test_cycle_commands() {
        let mut cursor = cursor(2);
        cursor.cycle(CycleCommand::Backward);
        assert_eq!(cursor.index(), Some(1));
        cursor.cycle(CycleCommand::Forward);
        assert_eq!(cursor.index(), Some(0));
    }

    #[test]
    fn test_single_item_never_moves() {
        let mut cursor = cursor(1);
        assert!(!cursor.next());
        assert!(!cursor.previous());
        assert_eq!(cursor.index(), Some(0));
    }

    #[test]
    fn test_select_wraps_cyclically() {
        let mut cursor = cursor(4);
        cursor.select(5);
        assert_eq!(cursor.index(), Some(1));
        cursor.select(-1);
        assert_eq!(cursor.index(), Some(3));
    }

    #[test]
    fn test_rebound_clamps_after_shrink() {
        let mut cursor = cursor(3);
        cursor.select(2);
        assert!(cursor.rebound(2));
        assert_eq!(cursor.index(), Some(1));
        assert!(!cursor.rebound(5));
        assert_eq!(cursor.index(), Some(1));
        assert!(cursor.rebound(0));
        assert_eq!(cursor.index_or_negative(), -1);
    }
}
