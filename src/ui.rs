use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};

use crate::controller::{DashboardHandle, LoadState, Notice, RenderModel, TaskCard, UiCommand};
use crate::countdown::Urgency;
use crate::models::{PopupMode, Priority};
use crate::penalty::format_amount;

const FRAME_POLL: Duration = Duration::from_millis(100);

pub struct App {
    handle: DashboardHandle,
    pub model: RenderModel,
    pub list_state: ListState,
    pub popup_mode: PopupMode,
    pub should_quit: bool,
}

impl App {
    pub fn new(handle: DashboardHandle) -> Self {
        let model = handle.latest();
        App {
            handle,
            model,
            list_state: ListState::default(),
            popup_mode: PopupMode::None,
            should_quit: false,
        }
    }

    /// Pulls the newest render model and keeps the cursor inside the list.
    pub fn sync(&mut self) {
        self.model = self.handle.latest();
        self.popup_mode = if self.model.selected.is_some() {
            PopupMode::ConfirmCompletion
        } else {
            PopupMode::None
        };

        let len = self.model.cards.len();
        match self.list_state.selected() {
            _ if len == 0 => self.list_state.select(None),
            Some(i) if i >= len => self.list_state.select(Some(len - 1)),
            None => self.list_state.select(Some(0)),
            _ => {}
        }
    }

    pub fn next_item(&mut self) {
        let len = self.model.cards.len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    pub fn previous_item(&mut self) {
        let len = self.model.cards.len();
        if len == 0 {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    pub fn select_highlighted(&mut self) {
        let card = self.list_state.selected().and_then(|i| self.model.cards.get(i));
        if let Some(card) = card {
            self.handle.send(UiCommand::Select(card.id.clone()));
        }
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        if self.popup_mode == PopupMode::ConfirmCompletion {
            match code {
                KeyCode::Char('y') | KeyCode::Enter => self.handle.send(UiCommand::ConfirmCompletion),
                KeyCode::Char('n') | KeyCode::Esc => self.handle.send(UiCommand::CancelSelection),
                _ => {}
            }
            return;
        }

        match code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('f') => self.handle.send(UiCommand::CycleFilter),
            KeyCode::Char('s') => self.handle.send(UiCommand::CycleSort),
            KeyCode::Char('r') => self.handle.send(UiCommand::Refresh),
            KeyCode::Esc => self.handle.send(UiCommand::DismissNotice),
            KeyCode::Down => self.next_item(),
            KeyCode::Up => self.previous_item(),
            KeyCode::Enter => self.select_highlighted(),
            _ => {}
        }
    }
}

pub fn run_tui(handle: DashboardHandle) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(handle);
    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        app.sync();
        terminal.draw(|f| ui(f, app))?;

        // Redraw at least every frame poll so timers keep moving without input
        if event::poll(FRAME_POLL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn urgency_color(urgency: Urgency) -> Color {
    match urgency {
        Urgency::Overdue => Color::Red,
        Urgency::Critical => Color::Yellow,
        Urgency::Normal => Color::Blue,
    }
}

fn priority_color(priority: Option<Priority>) -> Color {
    match priority {
        Some(Priority::Medium) => Color::Yellow,
        Some(Priority::High) => Color::LightRed,
        Some(Priority::Urgent) => Color::Red,
        Some(Priority::Low) | None => Color::Cyan,
    }
}

pub fn payout_spans(card: &TaskCard) -> Vec<Span<'static>> {
    if card.is_overdue() {
        vec![
            Span::styled(
                format_amount(card.base_amount),
                Style::default().fg(Color::Red).add_modifier(Modifier::CROSSED_OUT),
            ),
            Span::raw(" "),
            Span::styled(
                format_amount(card.display_amount),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
        ]
    } else {
        vec![Span::styled(
            format_amount(card.display_amount),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )]
    }
}

pub fn timer_span(card: &TaskCard) -> Span<'static> {
    match card.countdown {
        Some(countdown) => {
            let text = if countdown.is_overdue {
                format!("OVERDUE by {}", countdown.format_clock())
            } else {
                format!("Left {}", countdown.format_clock())
            };
            Span::styled(
                text,
                Style::default()
                    .fg(urgency_color(countdown.urgency()))
                    .add_modifier(Modifier::BOLD),
            )
        }
        None => Span::styled("No deadline", Style::default().fg(Color::DarkGray)),
    }
}

fn card_item(card: &TaskCard) -> ListItem<'static> {
    let mut header = vec![
        Span::styled(
            card.title.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(
            format!("[{}]", card.priority_label),
            Style::default().fg(priority_color(card.priority)),
        ),
    ];
    if !card.status_label.is_empty() {
        header.push(Span::styled(
            format!(" {}", card.status_label),
            Style::default().fg(Color::Gray),
        ));
    }

    let mut lines = vec![Line::from(header)];
    if let Some(description) = &card.description {
        lines.push(Line::from(Span::styled(
            description.clone(),
            Style::default().fg(Color::Gray),
        )));
    }
    if let Some(order) = &card.order {
        lines.push(Line::from(Span::styled(
            format!("{} · {}", order.title, order.client_name),
            Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
        )));
    }

    let mut money = payout_spans(card);
    money.push(Span::raw("   "));
    money.push(timer_span(card));
    if let Some(due) = &card.due_label {
        money.push(Span::styled(format!("   due {}", due), Style::default().fg(Color::DarkGray)));
    }
    lines.push(Line::from(money));
    lines.push(Line::from(""));

    ListItem::new(lines)
}

fn ui(f: &mut Frame, app: &mut App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(f.area());

    render_header(f, &app.model, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)].as_ref())
        .split(rows[1]);

    render_tasks(f, app, columns[0]);
    render_sidebar(f, &app.model, columns[1]);
    render_status(f, &app.model, rows[2]);

    if app.popup_mode == PopupMode::ConfirmCompletion {
        render_confirmation(f, &app.model);
    }
}

fn render_header(f: &mut Frame, model: &RenderModel, area: Rect) {
    let mut spans = vec![
        Span::styled(
            format!("Filter: {}", model.filter.label()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Sort: {}", model.sort.label()),
            Style::default().fg(Color::Cyan),
        ),
    ];
    if model.refreshing {
        spans.push(Span::styled("  |  refreshing…", Style::default().fg(Color::DarkGray)));
    }
    if model.stale_reason.is_some() {
        spans.push(Span::styled(
            "  |  showing last known tasks",
            Style::default().fg(Color::Yellow),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Worker Dashboard"));
    f.render_widget(header, area);
}

fn render_tasks(f: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Tasks ({})", app.model.cards.len()));

    let placeholder = match &app.model.load_state {
        LoadState::Loading => Some("Loading tasks…".to_string()),
        LoadState::Unavailable(reason) => Some(format!("No tasks available\n\n{}", reason)),
        LoadState::Ready if app.model.cards.is_empty() => Some("No tasks to display".to_string()),
        LoadState::Ready => None,
    };
    if let Some(text) = placeholder {
        let paragraph = Paragraph::new(text)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Gray));
        f.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = app.model.cards.iter().map(card_item).collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray))
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_sidebar(f: &mut Frame, model: &RenderModel, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Length(7), Constraint::Min(0)].as_ref())
        .split(area);

    let (dot, dot_color) = if model.online {
        ("● online", Color::Green)
    } else {
        ("● offline", Color::DarkGray)
    };
    let profile = &model.profile;
    let profile_lines = vec![
        Line::from(vec![
            Span::styled(
                format!("({}) ", profile.initials()),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                profile.display_name().to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(profile.role_label().to_string()),
        Line::from(profile.email.clone().unwrap_or_default()),
        Line::from(Span::styled(dot, Style::default().fg(dot_color))),
    ];
    f.render_widget(
        Paragraph::new(profile_lines).block(Block::default().borders(Borders::ALL).title("Profile")),
        chunks[0],
    );

    let metrics = &model.metrics;
    let metric_lines = vec![
        Line::from(format!("In progress:     {}", format_amount(metrics.total_in_progress_sum))),
        Line::from(format!("Earned:          {}", format_amount(metrics.total_earned))),
        Line::from(format!("Current tasks:   {}", metrics.current_tasks_count)),
        Line::from(format!("Completed today: {}", metrics.completed_today_count)),
    ];
    f.render_widget(
        Paragraph::new(metric_lines).block(Block::default().borders(Borders::ALL).title("Metrics")),
        chunks[1],
    );

    let completed: Vec<ListItem> = model
        .completed
        .iter()
        .map(|card| {
            ListItem::new(Line::from(vec![
                Span::styled("✓ ", Style::default().fg(Color::Green)),
                Span::raw(card.title.clone()),
                Span::styled(
                    format!("  {}", format_amount(card.base_amount)),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();
    f.render_widget(
        List::new(completed).block(Block::default().borders(Borders::ALL).title("Completed")),
        chunks[2],
    );
}

fn render_status(f: &mut Frame, model: &RenderModel, area: Rect) {
    let line = match &model.notice {
        Some(Notice::Success(text)) => Line::from(Span::styled(text.clone(), Style::default().fg(Color::Green))),
        Some(Notice::Failure(text)) => Line::from(Span::styled(
            format!("{}  (Esc to dismiss, Enter to retry)", text),
            Style::default().fg(Color::Red),
        )),
        None => Line::from("↑/↓: Navigate • Enter: Complete task • f: Filter • s: Sort • r: Refresh • q: Quit"),
    };
    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_confirmation(f: &mut Frame, model: &RenderModel) {
    let Some(card) = &model.selected else {
        return;
    };
    let area = centered_rect(50, 30, f.area());

    let mut lines = vec![
        Line::from(Span::styled(card.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(payout_spans(card)),
        Line::from(timer_span(card)),
        Line::from(""),
    ];
    if model.completing {
        lines.push(Line::from("Completing…"));
    } else {
        lines.push(Line::from("Mark this task completed? (y/n)"));
    }

    let popup = Paragraph::new(lines)
        .block(
            Block::default()
                .title("Complete Task")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::DarkGray)),
        )
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::White));

    f.render_widget(Clear, area);
    f.render_widget(popup, area);
}

// Helper function to create centered rectangles for popups
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::CountdownResult;
    use ratatui::backend::TestBackend;

    fn card(overdue: bool) -> TaskCard {
        TaskCard {
            id: "t1".to_string(),
            title: "Hang shelves".to_string(),
            description: None,
            order: None,
            priority: None,
            priority_label: "Normal",
            status_label: "Pending",
            is_completed: false,
            countdown: Some(CountdownResult {
                signed_remaining: if overdue { -10 } else { 3661 },
                is_overdue: overdue,
                is_critical: false,
                days: 0,
                hours: if overdue { 0 } else { 1 },
                minutes: if overdue { 0 } else { 1 },
                seconds: if overdue { 10 } else { 1 },
            }),
            due_label: Some("01 May 2024, 13:00".to_string()),
            base_amount: 100.0,
            display_amount: if overdue { 90.0 } else { 100.0 },
        }
    }

    #[test]
    fn overdue_payout_strikes_base_amount() {
        let spans = payout_spans(&card(true));
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].content, "100 ₽");
        assert!(spans[0].style.add_modifier.contains(Modifier::CROSSED_OUT));
        assert_eq!(spans[2].content, "90 ₽");

        let spans = payout_spans(&card(false));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].content, "100 ₽");
    }

    #[test]
    fn timer_text_follows_urgency() {
        assert_eq!(timer_span(&card(true)).content, "OVERDUE by 00:00:10");
        assert_eq!(timer_span(&card(false)).content, "Left 01:01:01");
        let mut undated = card(false);
        undated.countdown = None;
        assert_eq!(timer_span(&undated).content, "No deadline");
    }

    #[test]
    fn centered_rect_stays_inside() {
        let outer = Rect::new(0, 0, 100, 40);
        let inner = centered_rect(50, 30, outer);
        assert!(inner.x >= outer.x && inner.right() <= outer.right());
        assert!(inner.y >= outer.y && inner.bottom() <= outer.bottom());
    }

    #[test]
    fn header_renders_modes() {
        let backend = TestBackend::new(80, 3);
        let mut terminal = Terminal::new(backend).unwrap();
        let model = crate::controller::DashboardState::new(
            &crate::controller::DashboardConfig::new("w1"),
            chrono::Utc::now(),
        )
        .render();
        terminal
            .draw(|f| render_header(f, &model, f.area()))
            .unwrap();
        let buffer = terminal.backend().buffer();
        let text: String = buffer.content.iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Filter: Current"));
        assert!(text.contains("Sort: Deadline"));
    }
}
