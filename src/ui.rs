use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fast_distrib::{list_groups, list_units, GroupStats, UnitStatus};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Groups,
    Units,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Groups => Page::Units,
            Page::Units => Page::Groups,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Groups => "Groups",
            Page::Units => "Recipients",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFilter {
    All,
    NotSent,
    AwaitingDownload,
    Received,
}

impl UnitFilter {
    pub fn label(&self) -> &str {
        match self {
            UnitFilter::All => "all",
            UnitFilter::NotSent => "not sent",
            UnitFilter::AwaitingDownload => "awaiting download",
            UnitFilter::Received => "received",
        }
    }

    fn accepts(&self, status: &UnitStatus) -> bool {
        let unit = &status.unit;
        match self {
            UnitFilter::All => true,
            UnitFilter::NotSent => !unit.is_sent(),
            UnitFilter::AwaitingDownload => unit.is_sent() && !unit.received,
            UnitFilter::Received => unit.received,
        }
    }
}

pub struct App {
    pub groups: Vec<GroupStats>,
    pub groups_state: TableState,
    pub units: Vec<UnitStatus>,
    pub visible_units: Vec<UnitStatus>,
    pub units_state: TableState,
    pub current_page: Page,
    pub filter: UnitFilter,
}

impl App {
    pub fn new(groups: Vec<GroupStats>) -> Self {
        let mut groups_state = TableState::default();
        if !groups.is_empty() {
            groups_state.select(Some(0));
        }

        Self {
            groups,
            groups_state,
            units: Vec::new(),
            visible_units: Vec::new(),
            units_state: TableState::default(),
            current_page: Page::Groups,
            filter: UnitFilter::All,
        }
    }

    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self::new(list_groups(conn)?))
    }

    pub fn selected_group(&self) -> Option<&GroupStats> {
        self.groups_state.selected().and_then(|i| self.groups.get(i))
    }

    /// Replace the unit list (after opening a group or reloading)
    pub fn set_units(&mut self, units: Vec<UnitStatus>) {
        self.units = units;
        self.apply_filter(self.filter);
    }

    pub fn apply_filter(&mut self, filter: UnitFilter) {
        self.filter = filter;
        self.visible_units = self
            .units
            .iter()
            .filter(|s| filter.accepts(s))
            .cloned()
            .collect();

        let selection = if self.visible_units.is_empty() { None } else { Some(0) };
        self.units_state.select(selection);
    }

    fn open_selected_group(&mut self, conn: &Connection) -> Result<()> {
        if let Some(id) = self.selected_group().map(|g| g.group.id) {
            self.set_units(list_units(conn, id)?);
            self.current_page = Page::Units;
        }
        Ok(())
    }

    /// Replace the group list, keeping the same group selected (by id) when it still exists.
    /// Returns false when the previously selected group is gone.
    pub fn set_groups(&mut self, groups: Vec<GroupStats>) -> bool {
        let selected_id = self.selected_group().map(|g| g.group.id);
        self.groups = groups;

        let position = selected_id.and_then(|id| self.groups.iter().position(|g| g.group.id == id));
        let fallback = if self.groups.is_empty() { None } else { Some(0) };
        self.groups_state.select(position.or(fallback));

        selected_id.is_none() || position.is_some()
    }

    fn reload(&mut self, conn: &Connection) -> Result<()> {
        let kept = self.set_groups(list_groups(conn)?);

        if self.current_page == Page::Units {
            if !kept {
                self.set_units(Vec::new());
                self.current_page = Page::Groups;
            } else if let Some(id) = self.selected_group().map(|g| g.group.id) {
                self.set_units(list_units(conn, id)?);
            }
        }
        Ok(())
    }

    fn active(&mut self) -> (&mut TableState, usize) {
        match self.current_page {
            Page::Groups => (&mut self.groups_state, self.groups.len()),
            Page::Units => (&mut self.units_state, self.visible_units.len()),
        }
    }

    pub fn next(&mut self) {
        let (state, len) = self.active();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(i) if i + 1 >= len => 0,
            Some(i) => i + 1,
            None => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let (state, len) = self.active();
        if len == 0 {
            return;
        }
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App, conn: &Connection) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app, conn);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    conn: &Connection,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter if app.current_page == Page::Groups => app.open_selected_group(conn)?,
                KeyCode::Tab => app.current_page = app.current_page.next(),
                KeyCode::Backspace => app.current_page = Page::Groups,
                KeyCode::Char('r') => app.reload(conn)?,
                KeyCode::Char('1') => app.apply_filter(UnitFilter::All),
                KeyCode::Char('2') => app.apply_filter(UnitFilter::NotSent),
                KeyCode::Char('3') => app.apply_filter(UnitFilter::AwaitingDownload),
                KeyCode::Char('4') => app.apply_filter(UnitFilter::Received),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Groups => render_groups(f, chunks[1], app),
        Page::Units => render_units(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![];
    for (i, page) in [Page::Groups, Page::Units].iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(page.title().to_string(), style));
    }

    if let Some(stats) = app.selected_group() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(
            format!("#{} {}", stats.group.id, stats.group.label),
            Style::default().fg(Color::White),
        ));
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("✉ {}/{}", stats.sent, stats.total),
            Style::default().fg(Color::Cyan),
        ));
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("✓ {}/{}", stats.received, stats.total),
            Style::default().fg(Color::Green),
        ));
    }

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn render_groups(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.groups.iter().map(|stats| {
        let color = if stats.total > 0 && stats.received == stats.total {
            Color::Green
        } else if stats.sent < stats.total {
            Color::Yellow
        } else {
            Color::White
        };

        Row::new(vec![
            Cell::from(stats.group.id.to_string()),
            Cell::from(truncate(&stats.group.label, 40)),
            Cell::from(stats.group.created_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::from(stats.total.to_string()),
            Cell::from(stats.sent.to_string()).style(Style::default().fg(color)),
            Cell::from(stats.received.to_string()).style(Style::default().fg(color)),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(42),
            Constraint::Length(18),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["#", "Label", "Created", "Units", "Sent", "Received"]))
    .block(Block::default().borders(Borders::ALL).title(" Sending groups "))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.groups_state);
}

fn render_units(f: &mut Frame, area: Rect, app: &mut App) {
    let rows = app.visible_units.iter().map(|status| {
        let unit = &status.unit;
        let (state, color) = if unit.received {
            ("received", Color::Green)
        } else if unit.is_sent() {
            ("sent", Color::Cyan)
        } else {
            ("pending", Color::Yellow)
        };
        let when = unit
            .received_date
            .or(unit.sending_date)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let code = status.link.as_ref().map(|l| l.access_code.clone()).unwrap_or_default();

        Row::new(vec![
            Cell::from(truncate(&unit.name, 28)),
            Cell::from(truncate(&unit.email, 32)),
            Cell::from(truncate(&unit.file_name(), 24)),
            Cell::from(state).style(Style::default().fg(color)),
            Cell::from(when),
            Cell::from(code),
        ])
    });

    let title = format!(" Recipients ({}) ", app.filter.label());
    let table = Table::new(
        rows,
        [
            Constraint::Length(30),
            Constraint::Length(34),
            Constraint::Length(26),
            Constraint::Length(10),
            Constraint::Length(18),
            Constraint::Length(8),
        ],
    )
    .header(header_row(&["Name", "Email", "File", "Status", "Date", "Code"]))
    .block(Block::default().borders(Borders::ALL).title(title))
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.units_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (selected, total) = match app.current_page {
        Page::Groups => (app.groups_state.selected(), app.groups.len()),
        Page::Units => (app.units_state.selected(), app.visible_units.len()),
    };

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected.map(|i| i + 1).unwrap_or(0), total),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        key("Enter"),
        Span::raw(" Open | "),
        key("1-4"),
        Span::raw(" Filter | "),
        key("r"),
        Span::raw(" Reload | "),
        key("Tab"),
        Span::raw(" Page | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::White)));

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
