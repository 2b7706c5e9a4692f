use berryclub::{
    ledger::AccountId,
    line_decoder::{BoardSnapshot, Color as PixelColor},
    session::SessionState,
    surface::{ActivityLevel, ControlState, ViewSnapshot},
};
use color_eyre::eyre::{Result, eyre};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use itertools::Itertools;
use ratatui::{prelude::*, widgets::*};
use std::io::stdout;
use unicode_width::UnicodeWidthStr;

const ACTIVITY_LINES: usize = 5;
const PILL_MAX_WIDTH: usize = 32;
const UPPER_HALF_BLOCK: &str = "▀";

pub enum UserEvent {
    Quit,
    Refresh,
    Buy,
    Draw,
    /// Sign-in was requested; the caller supplies the account list.
    OpenSignIn,
    SignIn(AccountId),
    SignOut,
    Redraw,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    signed_in: Option<AccountId>,
    session_resolved: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    AccountMenu,
    AccountPicker(PickerState),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PickerState {
    accounts: Vec<AccountId>,
    idx: usize,
}

impl UiState {
    pub fn open_account_picker(&mut self, accounts: Vec<AccountId>) {
        self.mode = Mode::AccountPicker(PickerState { accounts, idx: 0 });
    }

    fn remember_session(&mut self, session: &SessionState) {
        self.signed_in = session.account_id().cloned();
        self.session_resolved = session.is_resolved();
        // the menu only makes sense for the variant it was opened from
        let outdated = matches!(
            (&self.mode, &self.signed_in),
            (Mode::AccountMenu, None) | (Mode::AccountPicker(_), Some(_))
        );
        if outdated {
            self.mode = Mode::Normal;
        }
    }
}

pub type InputEventReceiver = EventStream;

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(Ok(event)) => Ok(event),
        Some(Err(err)) => Err(err.into()),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &ViewSnapshot) -> Result<()> {
    state.remember_session(&snap.session);
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => interpret_key(state, key),
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

fn interpret_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    match &mut state.mode {
        Mode::AccountMenu => match key.code {
            KeyCode::Enter => {
                state.mode = Mode::Normal;
                Some(UserEvent::SignOut)
            }
            KeyCode::Esc | KeyCode::Char('s') | KeyCode::Char('q') => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::AccountPicker(picker) => match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                picker.idx = picker.idx.saturating_sub(1);
                Some(UserEvent::Redraw)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if picker.idx + 1 < picker.accounts.len() {
                    picker.idx += 1;
                }
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let chosen = picker.accounts.get(picker.idx).cloned();
                state.mode = Mode::Normal;
                Some(chosen.map_or(UserEvent::Redraw, UserEvent::SignIn))
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
            KeyCode::Char('r') => Some(UserEvent::Refresh),
            KeyCode::Char('b') => Some(UserEvent::Buy),
            KeyCode::Char('d') => Some(UserEvent::Draw),
            KeyCode::Char('s') | KeyCode::Enter => {
                if state.signed_in.is_some() {
                    state.mode = Mode::AccountMenu;
                    Some(UserEvent::Redraw)
                } else if state.session_resolved {
                    Some(UserEvent::OpenSignIn)
                } else {
                    None
                }
            }
            _ => None,
        },
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &ViewSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title + auth
            Constraint::Length(3), // supply / balance
            Constraint::Min(10),   // board + controls
            Constraint::Length(1), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_stats(f, chunks[1], snap);
    draw_body(f, chunks[2], snap);
    draw_help(f, chunks[3], snap);
    draw_modals(f, state, chunks[0]);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let block = Block::default().borders(Borders::ALL).title("BerryClub");
    let inner = block.inner(area);
    f.render_widget(block, area);
    f.render_widget(Paragraph::new(auth_line(&snap.session)).alignment(Alignment::Right), inner);
}

pub fn auth_line(session: &SessionState) -> Line<'static> {
    match session {
        SessionState::Unresolved => Line::from("Restoring session…".dark_gray()),
        SessionState::Connected(account) => Line::from(vec![
            Span::styled(
                format!(" {} ▾ ", truncate_to_width(account.as_str(), PILL_MAX_WIDTH)),
                Style::default().fg(Color::Black).bg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        SessionState::Disconnected => Line::from(vec!["[s] ".dark_gray(), "Sign In".bold()]),
    }
}

fn truncate_to_width(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        if out.width() + ch.to_string().width() + 1 > max {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

fn draw_stats(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let text = Line::from(vec![
        "Total supply: ".dark_gray(),
        Span::raw(snap.supply.clone()),
        "   Your balance: ".dark_gray(),
        Span::raw(snap.balance.clone()),
    ]);
    let widget = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Berries"));
    f.render_widget(widget, area);
}

fn draw_body(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(52), Constraint::Min(24)])
        .split(area);
    draw_board(f, columns[0], snap);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(3)])
        .split(columns[1]);
    draw_controls(f, side[0], snap);
    draw_activity(f, side[1], snap);
}

fn draw_board(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let title = if snap.board.stale {
        Line::from(vec!["Board ".into(), "(stale)".yellow()])
    } else {
        Line::from("Board")
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    f.render_widget(block, area);
    match snap.board.snapshot.as_deref() {
        Some(board) => f.render_widget(BoardWidget { board }, inner),
        None => f.render_widget(Paragraph::new("Loading board…".dark_gray()), inner),
    }
}

/// Two board rows per terminal line: the upper half block takes the top row
/// as foreground and the bottom row as background.
pub struct BoardWidget<'a> {
    pub board: &'a BoardSnapshot,
}

impl Widget for BoardWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for (line, pair) in self.board.rows().chunks(2).enumerate() {
            let Ok(dy) = u16::try_from(line) else {
                break;
            };
            if dy >= area.height {
                break;
            }
            let top = &pair[0];
            let bottom = pair.get(1);
            for (col, color) in top.iter().enumerate() {
                let Ok(dx) = u16::try_from(col) else {
                    break;
                };
                if dx >= area.width {
                    break;
                }
                let below = bottom.and_then(|row| row.get(col)).map_or(Color::Reset, |c| terminal_color(*c));
                if let Some(cell) = buf.cell_mut((area.x + dx, area.y + dy)) {
                    cell.set_symbol(UPPER_HALF_BLOCK).set_fg(terminal_color(*color)).set_bg(below);
                }
            }
        }
    }
}

pub fn terminal_color(color: PixelColor) -> Color {
    Color::Rgb(color.red(), color.green(), color.blue())
}

fn draw_controls(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let lines = vec![
        control_line('b', &snap.controls.buy),
        control_line('d', &snap.controls.draw),
    ];
    let widget = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Actions"));
    f.render_widget(widget, area);
}

fn control_line(key: char, control: &ControlState) -> Line<'static> {
    let label = if control.enabled {
        Span::raw(control.label.clone())
    } else {
        Span::styled(control.label.clone(), Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))
    };
    Line::from(vec![Span::styled(format!("[{key}] "), Style::default().fg(Color::DarkGray)), label])
}

fn draw_activity(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let lines: Vec<Line> = snap
        .recent_activity(ACTIVITY_LINES)
        .map(|entry| {
            let style = match entry.level {
                ActivityLevel::Info => Style::default().fg(Color::Green),
                ActivityLevel::Warn => Style::default().fg(Color::Yellow),
                ActivityLevel::Error => Style::default().fg(Color::Red),
            };
            Line::styled(entry.message.clone(), style)
        })
        .collect();
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Activity"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let sign = match snap.session {
        SessionState::Connected(_) => Some("s account"),
        SessionState::Disconnected => Some("s sign in"),
        SessionState::Unresolved => None,
    };
    let help = sign
        .into_iter()
        .chain(["b buy", "d draw", "r refresh", "q/Esc quit"])
        .join(" | ");
    f.render_widget(Paragraph::new(help).style(Style::default().fg(Color::DarkGray)), area);
}

fn draw_modals(f: &mut Frame, state: &UiState, header: Rect) {
    match &state.mode {
        Mode::Normal => {}
        Mode::AccountMenu => {
            let width = 16.min(header.width);
            let area = Rect {
                x: header.right().saturating_sub(width),
                y: header.bottom().saturating_sub(1),
                width,
                height: 3,
            }
            .intersection(f.area());
            f.render_widget(Clear, area);
            let menu = Paragraph::new(Line::from(" Sign Out ".reversed()))
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(menu, area);
        }
        Mode::AccountPicker(picker) => {
            let area = centered_rect(50, 50, f.area());
            f.render_widget(Clear, area);
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Sign in with")
                .title_bottom(Line::from("↑/↓ choose | Enter sign in | Esc cancel").centered());
            if picker.accounts.is_empty() {
                let empty = Paragraph::new("No keys found in the credentials directory.\nLog in with the near CLI first.")
                    .wrap(Wrap { trim: false })
                    .block(block);
                f.render_widget(empty, area);
                return;
            }
            let items: Vec<ListItem> = picker
                .accounts
                .iter()
                .map(|account| ListItem::new(account.to_string()))
                .collect();
            let list = List::new(items)
                .block(block)
                .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
                .highlight_symbol("> ");
            let mut list_state = ListState::default().with_selected(Some(picker.idx));
            f.render_stateful_widget(list, area, &mut list_state);
        }
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    horizontal[1]
}
