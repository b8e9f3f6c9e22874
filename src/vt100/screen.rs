//! Character grid for the VT100 screen
//!
//! Only characters are kept; the 3270 display has no use for VT100
//! renditions. Changed rows are tracked so rendering only touches what moved.

use std::collections::BTreeSet;

const BLANK: char = ' ';
const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    /// Cursor is past the last column; the next print wraps first
    pub pending_wrap: bool,
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    cursor: Cursor,
    origin_mode: bool,
}

#[derive(Debug, Clone)]
pub struct Screen {
    rows: usize,
    cols: usize,
    grid: Vec<Vec<char>>,
    cursor: Cursor,
    saved_cursor: Option<SavedCursor>,
    scroll_top: usize,
    scroll_bottom: usize,
    tab_stops: Vec<bool>,
    autowrap: bool,
    origin_mode: bool,
    insert_mode: bool,
    dirty: BTreeSet<usize>,
}

impl Screen {
    pub fn new(rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);

        Self {
            rows,
            cols,
            grid: vec![vec![BLANK; cols]; rows],
            cursor: Cursor::default(),
            saved_cursor: None,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            tab_stops: default_tab_stops(cols),
            autowrap: true,
            origin_mode: false,
            insert_mode: false,
            dirty: (0..rows).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn row(&self, row: usize) -> Option<&[char]> {
        self.grid.get(row).map(Vec::as_slice)
    }

    pub fn row_text(&self, row: usize) -> String {
        self.row(row).map(|cells| cells.iter().collect()).unwrap_or_default()
    }

    pub fn scroll_region(&self) -> (usize, usize) {
        (self.scroll_top, self.scroll_bottom)
    }

    pub fn origin_mode(&self) -> bool {
        self.origin_mode
    }

    pub fn dirty(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty.iter().copied()
    }

    /// Rows changed since the last call
    pub fn take_dirty(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    fn mark_rows_dirty(&mut self, rows: std::ops::RangeInclusive<usize>) {
        self.dirty.extend(rows);
    }

    fn mark_all_dirty(&mut self) {
        self.mark_rows_dirty(0..=self.rows - 1);
    }

    pub fn set_autowrap(&mut self, autowrap: bool) {
        self.autowrap = autowrap;
    }

    pub fn set_insert_mode(&mut self, insert_mode: bool) {
        self.insert_mode = insert_mode;
    }

    pub fn set_origin_mode(&mut self, origin_mode: bool) {
        self.origin_mode = origin_mode;
        self.move_cursor_to(0, 0);
    }

    /// Print a character at the cursor
    pub fn print(&mut self, character: char) {
        if self.cursor.pending_wrap {
            self.wrap_cursor();
        }

        let Cursor { row, col, .. } = self.cursor;

        if self.insert_mode {
            self.insert_blank_cells(row, col, 1);
        }

        self.grid[row][col] = character;
        self.dirty.insert(row);

        if col + 1 >= self.cols {
            self.cursor.pending_wrap = self.autowrap;
        } else {
            self.cursor.col = col + 1;
        }
    }

    fn wrap_cursor(&mut self) {
        self.cursor.pending_wrap = false;
        self.cursor.col = 0;
        self.index();
    }

    fn insert_blank_cells(&mut self, row: usize, col: usize, count: usize) {
        let line = &mut self.grid[row];

        let count = count.min(self.cols - col);

        line[col..].rotate_right(count);
        line[col..col + count].fill(BLANK);
    }

    pub fn linefeed(&mut self) {
        self.index();
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.cursor.pending_wrap = false;
    }

    pub fn backspace(&mut self) {
        self.cursor.pending_wrap = false;
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    pub fn tab(&mut self) {
        self.cursor.pending_wrap = false;

        let col = self.cursor.col;

        self.cursor.col = (col + 1..self.cols)
            .find(|column| self.tab_stops[*column])
            .unwrap_or(self.cols - 1);
    }

    /// Move down one row, scrolling at the bottom of the scroll region
    pub fn index(&mut self) {
        self.cursor.pending_wrap = false;

        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row < self.rows - 1 {
            self.cursor.row += 1;
        }
    }

    /// Move up one row, scrolling at the top of the scroll region
    pub fn reverse_index(&mut self) {
        self.cursor.pending_wrap = false;

        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    pub fn next_line(&mut self) {
        self.index();
        self.cursor.col = 0;
    }

    /// Scroll the region up; content moves up and blank rows appear at the
    /// bottom
    pub fn scroll_up(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);

        let n = n.min(bottom - top + 1);

        if n == 0 {
            return;
        }

        self.grid[top..=bottom].rotate_left(n);

        for line in &mut self.grid[bottom + 1 - n..=bottom] {
            line.fill(BLANK);
        }

        self.mark_rows_dirty(top..=bottom);
    }

    /// Scroll the region down; content moves down and blank rows appear at
    /// the top
    pub fn scroll_down(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);

        let n = n.min(bottom - top + 1);

        if n == 0 {
            return;
        }

        self.grid[top..=bottom].rotate_right(n);

        for line in &mut self.grid[top..top + n] {
            line.fill(BLANK);
        }

        self.mark_rows_dirty(top..=bottom);
    }

    /// Set the scroll region (DECSTBM), rows are zero based and inclusive
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let bottom = bottom.min(self.rows - 1);

        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }

        self.move_cursor_to(0, 0);
    }

    pub fn set_tab_stop(&mut self) {
        self.tab_stops[self.cursor.col] = true;
    }

    /// Clear the tab stop at the cursor (mode 0) or all tab stops (mode 3)
    pub fn clear_tab_stop(&mut self, mode: u16) {
        match mode {
            0 => self.tab_stops[self.cursor.col] = false,
            3 => self.tab_stops.fill(false),
            _ => {},
        }
    }

    pub fn erase_in_display(&mut self, mode: u16) {
        let Cursor { row, col, .. } = self.cursor;

        match mode {
            0 => {
                self.grid[row][col..].fill(BLANK);

                for line in &mut self.grid[row + 1..] {
                    line.fill(BLANK);
                }

                self.mark_rows_dirty(row..=self.rows - 1);
            },
            1 => {
                for line in &mut self.grid[..row] {
                    line.fill(BLANK);
                }

                self.grid[row][..=col].fill(BLANK);

                self.mark_rows_dirty(0..=row);
            },
            2 => {
                for line in &mut self.grid {
                    line.fill(BLANK);
                }

                self.mark_all_dirty();
            },
            _ => {},
        }
    }

    pub fn erase_in_line(&mut self, mode: u16) {
        let Cursor { row, col, .. } = self.cursor;

        let line = &mut self.grid[row];

        match mode {
            0 => line[col..].fill(BLANK),
            1 => line[..=col].fill(BLANK),
            2 => line.fill(BLANK),
            _ => return,
        }

        self.dirty.insert(row);
    }

    pub fn erase_chars(&mut self, n: usize) {
        let Cursor { row, col, .. } = self.cursor;

        let end = (col + n).min(self.cols);

        self.grid[row][col..end].fill(BLANK);
        self.dirty.insert(row);
    }

    pub fn insert_lines(&mut self, n: usize) {
        let row = self.cursor.row;

        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }

        let top = self.scroll_top;

        self.scroll_top = row;
        self.scroll_down(n);
        self.scroll_top = top;

        self.cursor.col = 0;
    }

    pub fn delete_lines(&mut self, n: usize) {
        let row = self.cursor.row;

        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }

        let top = self.scroll_top;

        self.scroll_top = row;
        self.scroll_up(n);
        self.scroll_top = top;

        self.cursor.col = 0;
    }

    pub fn insert_chars(&mut self, n: usize) {
        let Cursor { row, col, .. } = self.cursor;

        self.insert_blank_cells(row, col, n);
        self.dirty.insert(row);
    }

    pub fn delete_chars(&mut self, n: usize) {
        let Cursor { row, col, .. } = self.cursor;

        let line = &mut self.grid[row];

        let n = n.min(self.cols - col);

        line[col..].rotate_left(n);

        let cols = self.cols;

        line[cols - n..].fill(BLANK);

        self.dirty.insert(row);
    }

    /// Move the cursor, relative to the scroll region in origin mode
    pub fn move_cursor_to(&mut self, row: usize, col: usize) {
        self.cursor.row = if self.origin_mode {
            (self.scroll_top + row).min(self.scroll_bottom)
        } else {
            row.min(self.rows - 1)
        };

        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_up(&mut self, n: usize) {
        let limit = if self.cursor.row >= self.scroll_top { self.scroll_top } else { 0 };

        self.cursor.row = self.cursor.row.saturating_sub(n).max(limit);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_down(&mut self, n: usize) {
        let limit = if self.cursor.row <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            self.rows - 1
        };

        self.cursor.row = (self.cursor.row + n).min(limit);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_forward(&mut self, n: usize) {
        self.cursor.col = (self.cursor.col + n).min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn move_cursor_backward(&mut self, n: usize) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
        self.cursor.pending_wrap = false;
    }

    pub fn set_cursor_col(&mut self, col: usize) {
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    pub fn set_cursor_row(&mut self, row: usize) {
        let col = self.cursor.col;

        self.move_cursor_to(row, col);
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some(SavedCursor {
            cursor: self.cursor,
            origin_mode: self.origin_mode,
        });
    }

    pub fn restore_cursor(&mut self) {
        let Some(saved) = self.saved_cursor else {
            self.origin_mode = false;
            self.move_cursor_to(0, 0);
            return;
        };

        self.origin_mode = saved.origin_mode;
        self.cursor = Cursor {
            row: saved.cursor.row.min(self.rows - 1),
            col: saved.cursor.col.min(self.cols - 1),
            pending_wrap: saved.cursor.pending_wrap,
        };
    }

    /// Fill the screen with `E` (DECALN)
    pub fn alignment_test(&mut self) {
        for line in &mut self.grid {
            line.fill('E');
        }

        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
        self.move_cursor_to(0, 0);
        self.mark_all_dirty();
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.rows, self.cols);
    }
}

fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|col| col > 0 && col % TAB_WIDTH == 0).collect()
}
