//! Board contract and board groups.

use super::{Backend, ComponentKind};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors raised when looking boards up in a group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameworkError {
    /// The group is empty.
    #[error("no boards were found")]
    NoBoards,
    /// A single board was required but the group holds this many.
    #[error("expected exactly one board, found {0}")]
    MultipleBoards(usize),
    /// No board carries the requested serial number.
    #[error("no board with serial number {0}")]
    UnknownSerial(String),
}

/// A discoverable piece of hardware.
pub trait Board {
    /// Error raised by hardware operations.
    type Error: std::error::Error;

    /// Human-readable board name.
    fn name(&self) -> &str;

    /// Unique identifier of this board.
    fn serial_number(&self) -> &str;

    /// Firmware or driver version, if the board reports one.
    fn firmware_version(&self) -> Option<String>;

    /// Puts the hardware into a safe state, releasing held devices.
    fn make_safe(&mut self) -> Result<(), Self::Error>;

    /// Component kinds this board carries.
    fn supported_components() -> HashSet<ComponentKind>
    where
        Self: Sized;
}

/// Boards of one type, keyed and ordered by serial number.
///
/// Every board is made safe when the group is dropped.
pub struct BoardGroup<B: Board> {
    boards: BTreeMap<String, B>,
}

impl<B: Board> BoardGroup<B> {
    /// Collects boards, keeping the first board seen for each serial.
    pub fn from_boards(boards: impl IntoIterator<Item = B>) -> Self {
        let mut map = BTreeMap::new();
        for board in boards {
            let serial = board.serial_number().to_owned();
            if map.contains_key(&serial) {
                tracing::warn!(%serial, "ignoring board with duplicate serial");
                continue;
            }
            map.insert(serial, board);
        }
        Self { boards: map }
    }

    /// Discovers all boards of backend `Be`.
    pub fn discover<Be>(context: &Be::Context) -> Result<Self, Be::Error>
    where
        Be: Backend<Board = B>,
    {
        let boards = Be::discover(context)?;
        let group = Self::from_boards(boards);
        tracing::info!(count = group.len(), serials = ?group.serials(), "discovered boards");
        Ok(group)
    }

    /// Number of boards in the group.
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// Whether the group holds no boards.
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Serial numbers in ascending order.
    pub fn serials(&self) -> Vec<&str> {
        self.boards.keys().map(String::as_str).collect()
    }

    /// Returns the only board in the group.
    pub fn singular(&mut self) -> Result<&mut B, FrameworkError> {
        match self.boards.len() {
            0 => Err(FrameworkError::NoBoards),
            1 => Ok(self
                .boards
                .values_mut()
                .next()
                .ok_or(FrameworkError::NoBoards)?),
            n => Err(FrameworkError::MultipleBoards(n)),
        }
    }

    /// Looks a board up by serial number.
    pub fn get(&self, serial: &str) -> Result<&B, FrameworkError> {
        self.boards
            .get(serial)
            .ok_or_else(|| FrameworkError::UnknownSerial(serial.to_owned()))
    }

    /// Looks a board up by serial number for mutation.
    pub fn get_mut(&mut self, serial: &str) -> Result<&mut B, FrameworkError> {
        self.boards
            .get_mut(serial)
            .ok_or_else(|| FrameworkError::UnknownSerial(serial.to_owned()))
    }

    /// Iterates boards in serial order.
    pub fn iter(&self) -> impl Iterator<Item = &B> {
        self.boards.values()
    }

    /// Iterates boards mutably in serial order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut B> {
        self.boards.values_mut()
    }

    /// Makes every board safe, returning the first failure.
    ///
    /// All boards are attempted even if one fails.
    pub fn make_safe(&mut self) -> Result<(), B::Error> {
        let mut first_error = None;
        for (serial, board) in self.boards.iter_mut() {
            if let Err(e) = board.make_safe() {
                tracing::error!(%serial, "failed to make board safe: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<B: Board> Drop for BoardGroup<B> {
    fn drop(&mut self) {
        let _ = self.make_safe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Error)]
    #[error("stuck")]
    struct Stuck;

    struct TestBoard {
        serial: String,
        fail: bool,
        safe_calls: Rc<Cell<u32>>,
    }

    impl TestBoard {
        fn new(serial: &str, safe_calls: &Rc<Cell<u32>>) -> Self {
            Self {
                serial: serial.to_owned(),
                fail: false,
                safe_calls: Rc::clone(safe_calls),
            }
        }
    }

    impl Board for TestBoard {
        type Error = Stuck;

        fn name(&self) -> &str {
            "Test Board"
        }

        fn serial_number(&self) -> &str {
            &self.serial
        }

        fn firmware_version(&self) -> Option<String> {
            None
        }

        fn make_safe(&mut self) -> Result<(), Stuck> {
            self.safe_calls.set(self.safe_calls.get() + 1);
            if self.fail {
                Err(Stuck)
            } else {
                Ok(())
            }
        }

        fn supported_components() -> HashSet<ComponentKind> {
            HashSet::new()
        }
    }

    #[test]
    fn test_singular() {
        let calls = Rc::new(Cell::new(0));

        let mut empty = BoardGroup::<TestBoard>::from_boards([]);
        assert_eq!(empty.singular().err(), Some(FrameworkError::NoBoards));

        let mut one = BoardGroup::from_boards([TestBoard::new("0", &calls)]);
        assert_eq!(one.singular().unwrap().serial_number(), "0");

        let mut two =
            BoardGroup::from_boards([TestBoard::new("0", &calls), TestBoard::new("1", &calls)]);
        assert_eq!(two.singular().err(), Some(FrameworkError::MultipleBoards(2)));
    }

    #[test]
    fn test_lookup_by_serial() {
        let calls = Rc::new(Cell::new(0));
        let group = BoardGroup::from_boards([
            TestBoard::new("2", &calls),
            TestBoard::new("10", &calls),
            TestBoard::new("2", &calls),
        ]);

        assert_eq!(group.len(), 2);
        assert_eq!(group.serials(), vec!["10", "2"]);
        assert!(group.get("10").is_ok());
        assert_eq!(
            group.get("3").err(),
            Some(FrameworkError::UnknownSerial("3".to_owned()))
        );
    }

    #[test]
    fn test_make_safe_attempts_every_board() {
        let calls = Rc::new(Cell::new(0));
        let mut failing = TestBoard::new("0", &calls);
        failing.fail = true;

        let mut group = BoardGroup::from_boards([failing, TestBoard::new("1", &calls)]);
        assert!(group.make_safe().is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_drop_makes_boards_safe() {
        let calls = Rc::new(Cell::new(0));
        {
            let _group =
                BoardGroup::from_boards([TestBoard::new("0", &calls), TestBoard::new("1", &calls)]);
        }
        assert_eq!(calls.get(), 2);
    }
}
