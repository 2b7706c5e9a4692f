pub mod display;
pub mod ledger;
pub mod line_decoder;
pub mod reconciler;
pub mod session;
pub mod submitter;
pub mod surface;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use line_decoder::{
    BoardSnapshot,
    Color,
    DecodedLine,
    decode_line,
};
pub use reconciler::{
    PassOutcome,
    Reconciler,
    ReconcilerConfig,
    RefreshHandle,
    RefreshReason,
};
pub use session::{
    RestoreGate,
    SessionState,
    WalletSession,
};
pub use submitter::{
    ActionSubmitter,
    Intent,
    SubmitOutcome,
};
pub use surface::{
    ViewSnapshot,
    ViewSurface,
};

/// Number of rows on the shared board; the board is square.
pub const BOARD_HEIGHT: u32 = 50;
