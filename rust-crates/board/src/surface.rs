//! The single render target every reconciliation pass and submission writes
//! to. Readers subscribe and redraw whenever it changes.

use crate::{
    display::{
        DEFAULT_BALANCE,
        SUPPLY_FALLBACK,
    },
    line_decoder::BoardSnapshot,
    session::SessionState,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};
use tokio::sync::watch;

pub const ACTIVITY_CAPACITY: usize = 50;
pub const BUSY_LABEL: &str = "Sending…";
pub const BUY_LABEL: &str = "Buy 25 🥑";
pub const DRAW_LABEL: &str = "Draw Green Pixel";

pub type PassId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ControlId {
    Buy,
    Draw,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlState {
    pub label: String,
    pub enabled: bool,
    saved_label: Option<String>,
}

impl ControlState {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            enabled: true,
            saved_label: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.enabled
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Controls {
    pub buy: ControlState,
    pub draw: ControlState,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            buy: ControlState::new(BUY_LABEL),
            draw: ControlState::new(DRAW_LABEL),
        }
    }
}

impl Controls {
    pub fn get(&self, id: ControlId) -> &ControlState {
        match id {
            ControlId::Buy => &self.buy,
            ControlId::Draw => &self.draw,
        }
    }

    fn get_mut(&mut self, id: ControlId) -> &mut ControlState {
        match id {
            ControlId::Buy => &mut self.buy,
            ControlId::Draw => &mut self.draw,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActivityEntry {
    pub level: ActivityLevel,
    pub message: String,
}

/// Latest decoded board. `stale` is set when the most recent board read
/// failed and this is the board from an earlier pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardView {
    pub snapshot: Option<Arc<BoardSnapshot>>,
    pub stale: bool,
}

/// Supply/balance/board values produced by one pass. `board: None` means
/// the board read failed.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciledFields {
    pub supply: String,
    pub balance: String,
    pub board: Option<BoardSnapshot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewSnapshot {
    pub committed_pass: PassId,
    pub session: SessionState,
    pub supply: String,
    pub balance: String,
    pub board: BoardView,
    pub controls: Controls,
    pub activity: VecDeque<ActivityEntry>,
}

impl Default for ViewSnapshot {
    fn default() -> Self {
        Self {
            committed_pass: 0,
            session: SessionState::Unresolved,
            supply: SUPPLY_FALLBACK.to_string(),
            balance: DEFAULT_BALANCE.to_string(),
            board: BoardView::default(),
            controls: Controls::default(),
            activity: VecDeque::new(),
        }
    }
}

impl ViewSnapshot {
    pub fn recent_activity(&self, count: usize) -> impl Iterator<Item = &ActivityEntry> {
        self.activity.iter().rev().take(count)
    }
}

#[derive(Clone)]
pub struct ViewSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    latest_issued: AtomicU64,
    state: watch::Sender<ViewSnapshot>,
}

impl Default for ViewSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewSurface {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ViewSnapshot::default());
        Self {
            inner: Arc::new(SurfaceInner {
                latest_issued: AtomicU64::new(0),
                state,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Issue the next pass id. Any pass issued earlier loses the right to
    /// commit.
    pub fn begin_pass(&self) -> PassId {
        self.inner.latest_issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_issued(&self) -> PassId {
        self.inner.latest_issued.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, pass: PassId) -> bool {
        self.latest_issued() == pass
    }

    /// Replace the auth section. Returns false when `pass` is stale.
    pub fn commit_session(&self, pass: PassId, session: SessionState) -> bool {
        self.commit_if_current(pass, |view| {
            view.session = session;
        })
    }

    /// Replace supply, balance and board. A failed board read keeps the
    /// previous board and marks it stale. Returns false when `pass` is stale.
    pub fn commit_fields(&self, pass: PassId, fields: ReconciledFields) -> bool {
        self.commit_if_current(pass, |view| {
            view.supply = fields.supply;
            view.balance = fields.balance;
            view.board = match fields.board {
                Some(board) => BoardView {
                    snapshot: Some(Arc::new(board)),
                    stale: false,
                },
                None => BoardView {
                    snapshot: view.board.snapshot.clone(),
                    stale: true,
                },
            };
        })
    }

    fn commit_if_current(&self, pass: PassId, apply: impl FnOnce(&mut ViewSnapshot)) -> bool {
        let inner = &self.inner;
        inner.state.send_if_modified(|view| {
            if inner.latest_issued.load(Ordering::SeqCst) != pass {
                return false;
            }
            apply(view);
            view.committed_pass = pass;
            true
        })
    }

    /// Mark a control busy. False if it already is.
    pub fn try_mark_busy(&self, id: ControlId) -> bool {
        self.inner.state.send_if_modified(|view| {
            let control = view.controls.get_mut(id);
            if control.is_busy() {
                return false;
            }
            control.saved_label = Some(std::mem::replace(&mut control.label, BUSY_LABEL.to_string()));
            control.enabled = false;
            true
        })
    }

    pub fn release_busy(&self, id: ControlId) {
        self.inner.state.send_modify(|view| {
            let control = view.controls.get_mut(id);
            if let Some(label) = control.saved_label.take() {
                control.label = label;
            }
            control.enabled = true;
        });
    }

    pub fn push_activity(&self, level: ActivityLevel, message: impl Into<String>) {
        let entry = ActivityEntry {
            level,
            message: message.into(),
        };
        self.inner.state.send_modify(|view| {
            view.activity.push_back(entry);
            while view.activity.len() > ACTIVITY_CAPACITY {
                view.activity.pop_front();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        ledger::AccountId,
        line_decoder::Color,
    };

    fn fields(supply: &str, board: Option<BoardSnapshot>) -> ReconciledFields {
        ReconciledFields {
            supply: supply.to_string(),
            balance: DEFAULT_BALANCE.to_string(),
            board,
        }
    }

    #[test]
    fn commit_fields__stale_pass_is_discarded() {
        // given
        let surface = ViewSurface::new();
        let older = surface.begin_pass();
        let newer = surface.begin_pass();
        assert!(surface.commit_fields(newer, fields("2.0000 🥑", None)));

        // when
        let committed = surface.commit_fields(older, fields("1.0000 🥑", None));

        // then
        assert!(!committed);
        let view = surface.snapshot();
        assert_eq!(view.supply, "2.0000 🥑");
        assert_eq!(view.committed_pass, newer);
    }

    #[test]
    fn commit_session__only_latest_pass_wins() {
        // given
        let surface = ViewSurface::new();
        let first = surface.begin_pass();
        let _second = surface.begin_pass();
        let alice = AccountId::parse("alice").unwrap();

        // when
        let committed = surface.commit_session(first, SessionState::Connected(alice));

        // then
        assert!(!committed);
        assert_eq!(surface.snapshot().session, SessionState::Unresolved);
    }

    #[test]
    fn commit_fields__failed_board_keeps_previous_board_as_stale() {
        // given
        let surface = ViewSurface::new();
        let board = BoardSnapshot::from_rows(vec![vec![Color::from_raw(0xff)]]);
        let pass = surface.begin_pass();
        surface.commit_fields(pass, fields("-", Some(board.clone())));

        // when
        let pass = surface.begin_pass();
        surface.commit_fields(pass, fields("-", None));

        // then
        let view = surface.snapshot();
        assert!(view.board.stale);
        assert_eq!(view.board.snapshot.as_deref(), Some(&board));
    }

    #[test]
    fn try_mark_busy__second_attempt_is_refused_until_released() {
        // given
        let surface = ViewSurface::new();

        // when
        let first = surface.try_mark_busy(ControlId::Buy);
        let second = surface.try_mark_busy(ControlId::Buy);

        // then
        assert!(first);
        assert!(!second);
        let busy = surface.snapshot();
        assert_eq!(busy.controls.buy.label, BUSY_LABEL);
        assert!(busy.controls.draw.enabled);

        surface.release_busy(ControlId::Buy);
        let released = surface.snapshot();
        assert_eq!(released.controls.buy.label, BUY_LABEL);
        assert!(released.controls.buy.enabled);
    }

    #[test]
    fn push_activity__keeps_only_the_newest_entries() {
        // given
        let surface = ViewSurface::new();

        // when
        for idx in 0..(ACTIVITY_CAPACITY + 5) {
            surface.push_activity(ActivityLevel::Info, format!("entry {idx}"));
        }

        // then
        let view = surface.snapshot();
        assert_eq!(view.activity.len(), ACTIVITY_CAPACITY);
        let newest = view.recent_activity(1).next().unwrap();
        assert_eq!(newest.message, format!("entry {}", ACTIVITY_CAPACITY + 4));
    }
}
