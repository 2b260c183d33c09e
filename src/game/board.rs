//! Board State
//!
//! The 3x3 board and line-of-three evaluation. Pure data, no identities:
//! the session maps marks to participants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of cells on the board.
pub const CELL_COUNT: usize = 9;

/// The 8 winning lines: 3 rows, 3 columns, 2 diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    // Rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // Columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // Diagonals
    [0, 4, 8],
    [2, 4, 6],
];

/// A player's mark. `X` belongs to whoever moves first in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    /// First participant.
    X,
    /// Second participant.
    O,
}

impl Mark {
    /// The other mark.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

/// Board errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Index outside 0..9.
    #[error("cell {0} is off the board")]
    OutOfRange(usize),
    /// Cell already owned.
    #[error("cell {0} is already taken")]
    Occupied(usize),
}

/// A 3x3 board, cells indexed row-major 0..9.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [Option<Mark>; CELL_COUNT],
}

impl Board {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cell. `None` if the index is off the board.
    pub fn get(&self, index: usize) -> Option<Option<Mark>> {
        self.cells.get(index).copied()
    }

    /// All cells in index order.
    pub fn cells(&self) -> &[Option<Mark>; CELL_COUNT] {
        &self.cells
    }

    /// Place a mark on an empty cell.
    pub fn place(&mut self, index: usize, mark: Mark) -> Result<(), BoardError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(BoardError::OutOfRange(index))?;
        if cell.is_some() {
            return Err(BoardError::Occupied(index));
        }
        *cell = Some(mark);
        Ok(())
    }

    /// Number of filled cells.
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// True when no cell is empty.
    pub fn is_full(&self) -> bool {
        self.filled() == CELL_COUNT
    }

    /// The mark owning a complete line, if any.
    pub fn winner(&self) -> Option<Mark> {
        WIN_LINES.iter().find_map(|&[a, b, c]| match self.cells[a] {
            Some(mark) if self.cells[b] == Some(mark) && self.cells[c] == Some(mark) => Some(mark),
            _ => None,
        })
    }

    /// Empty every cell.
    pub fn clear(&mut self) {
        self.cells = [None; CELL_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_from(marks: &[(usize, Mark)]) -> Board {
        let mut board = Board::new();
        for &(i, m) in marks {
            board.place(i, m).unwrap();
        }
        board
    }

    #[test]
    fn test_empty_board_has_no_winner() {
        let board = Board::new();
        assert_eq!(board.winner(), None);
        assert_eq!(board.filled(), 0);
        assert!(!board.is_full());
    }

    #[test]
    fn test_top_row_wins() {
        let board = board_from(&[(0, Mark::X), (1, Mark::X), (2, Mark::X)]);
        assert_eq!(board.winner(), Some(Mark::X));
    }

    #[test]
    fn test_column_and_diagonals() {
        let column = board_from(&[(1, Mark::O), (4, Mark::O), (7, Mark::O)]);
        assert_eq!(column.winner(), Some(Mark::O));

        let diag = board_from(&[(0, Mark::X), (4, Mark::X), (8, Mark::X)]);
        assert_eq!(diag.winner(), Some(Mark::X));

        let anti = board_from(&[(2, Mark::O), (4, Mark::O), (6, Mark::O)]);
        assert_eq!(anti.winner(), Some(Mark::O));
    }

    #[test]
    fn test_full_board_without_line() {
        // X O X
        // X O O
        // O X X
        let board = board_from(&[
            (0, Mark::X),
            (1, Mark::O),
            (2, Mark::X),
            (3, Mark::X),
            (4, Mark::O),
            (5, Mark::O),
            (6, Mark::O),
            (7, Mark::X),
            (8, Mark::X),
        ]);
        assert!(board.is_full());
        assert_eq!(board.winner(), None);
    }

    #[test]
    fn test_place_rejects_taken_and_off_board() {
        let mut board = Board::new();
        board.place(4, Mark::X).unwrap();

        assert_eq!(board.place(4, Mark::O), Err(BoardError::Occupied(4)));
        assert_eq!(board.place(9, Mark::O), Err(BoardError::OutOfRange(9)));
        assert_eq!(board.get(4), Some(Some(Mark::X)));
        assert_eq!(board.get(9), None);
    }

    #[test]
    fn test_clear() {
        let mut board = board_from(&[(0, Mark::X), (8, Mark::O)]);
        board.clear();
        assert_eq!(board, Board::new());
    }
}
