// 🖥️ Registry browser - read-only terminal view of the state directory
//
// Three pages (Tab / Shift+Tab): Recipients, Donors, Rounds.
// Enter opens a detail panel for the selected recipient or donor,
// 'f' toggles "only open" (recipients short of cards, donors with capacity left).

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use donation_match::{Donor, Recipient, Registry, SLOTS_PER_RECIPIENT};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

const PAGE_JUMP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Recipients,
    Donors,
    Rounds,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Recipients => Page::Donors,
            Page::Donors => Page::Rounds,
            Page::Rounds => Page::Recipients,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Recipients => Page::Rounds,
            Page::Donors => Page::Recipients,
            Page::Rounds => Page::Donors,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Recipients => "Recipients",
            Page::Donors => "Donors",
            Page::Rounds => "Rounds",
        }
    }
}

pub struct App {
    pub registry: Registry,
    pub current_page: Page,
    pub recipients_state: TableState,
    pub donors_state: TableState,
    pub rounds_state: TableState,
    pub show_detail: bool,
    pub only_open: bool,
}

impl App {
    pub fn new(registry: Registry) -> Self {
        let mut app = Self {
            registry,
            current_page: Page::Recipients,
            recipients_state: TableState::default(),
            donors_state: TableState::default(),
            rounds_state: TableState::default(),
            show_detail: false,
            only_open: false,
        };
        app.reset_selection();
        app
    }

    /// Recipients shown on the Recipients page, in key order
    pub fn visible_recipients(&self) -> Vec<&Recipient> {
        self.registry
            .recipients()
            .values()
            .filter(|r| !self.only_open || r.is_open())
            .collect()
    }

    pub fn visible_donors(&self) -> Vec<&Donor> {
        self.registry
            .donors()
            .values()
            .filter(|d| !self.only_open || d.remaining() > 0)
            .collect()
    }

    fn page_len(&self) -> usize {
        match self.current_page {
            Page::Recipients => self.visible_recipients().len(),
            Page::Donors => self.visible_donors().len(),
            Page::Rounds => self.registry.rounds().len(),
        }
    }

    fn page_state(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Recipients => &mut self.recipients_state,
            Page::Donors => &mut self.donors_state,
            Page::Rounds => &mut self.rounds_state,
        }
    }

    fn reset_selection(&mut self) {
        let lens = [
            self.visible_recipients().len(),
            self.visible_donors().len(),
            self.registry.rounds().len(),
        ];
        let states = [
            &mut self.recipients_state,
            &mut self.donors_state,
            &mut self.rounds_state,
        ];
        for (state, len) in states.into_iter().zip(lens) {
            state.select(if len == 0 { None } else { Some(0) });
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn toggle_only_open(&mut self) {
        self.only_open = !self.only_open;
        self.reset_selection();
    }

    pub fn selected_recipient(&self) -> Option<&Recipient> {
        self.recipients_state
            .selected()
            .and_then(|i| self.visible_recipients().get(i).copied())
    }

    pub fn selected_donor(&self) -> Option<&Donor> {
        self.donors_state
            .selected()
            .and_then(|i| self.visible_donors().get(i).copied())
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.page_len();
        if len == 0 {
            return;
        }
        let state = self.page_state();
        let i = match state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.page_len();
        if len == 0 {
            return;
        }
        let state = self.page_state();
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.page_len();
        if len == 0 {
            return;
        }
        let state = self.page_state();
        let i = state.selected().map(|i| (i + PAGE_JUMP).min(len - 1)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let state = self.page_state();
        let i = state.selected().map(|i| i.saturating_sub(PAGE_JUMP)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn first(&mut self) {
        if self.page_len() > 0 {
            self.page_state().select(Some(0));
        }
    }

    pub fn last(&mut self) {
        let len = self.page_len();
        if len > 0 {
            self.page_state().select(Some(len - 1));
        }
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

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
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => app.next_page(),
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('f') => app.toggle_only_open(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
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

    let with_detail = app.show_detail && app.current_page != Page::Rounds;
    let (table_area, detail_area) = if with_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        (content_chunks[0], Some(content_chunks[1]))
    } else {
        (chunks[1], None)
    };

    match app.current_page {
        Page::Recipients => render_recipients(f, table_area, app),
        Page::Donors => render_donors(f, table_area, app),
        Page::Rounds => render_rounds(f, table_area, app),
    }
    if let Some(area) = detail_area {
        match app.current_page {
            Page::Recipients => render_recipient_detail(f, area, app),
            Page::Donors => render_donor_detail(f, area, app),
            Page::Rounds => {}
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled(
        " 🎁 Donation Match ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];

    for (i, page) in [Page::Recipients, Page::Donors, Page::Rounds].iter().enumerate() {
        spans.push(Span::raw(if i == 0 { " " } else { " │ " }));
        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(page.title(), style));
    }

    spans.push(Span::raw("   "));
    spans.push(Span::styled(
        format!(
            "open demand {} · free capacity {} · cards {}",
            app.registry.open_demand(),
            app.registry.free_capacity(),
            app.registry.history().len()
        ),
        Style::default().fg(Color::Green),
    ));

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

fn framed(title: String) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(title)
}

fn highlight() -> Style {
    Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
}

fn render_recipients(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_recipients()
        .iter()
        .map(|r| {
            let color = if r.is_full() { Color::Green } else { Color::Red };
            Row::new(vec![
                Cell::from(truncate(&r.home_email, 30)),
                Cell::from(truncate(&r.name, 24)),
                Cell::from(truncate(&r.stores.join("; "), 30)),
                Cell::from(format!("{}/{}", r.filled(), SLOTS_PER_RECIPIENT))
                    .style(Style::default().fg(color)),
                Cell::from(if r.physical_cards { "physical" } else { "" }),
            ])
        })
        .collect();
    let title = format!(" Recipients ({}) ", rows.len());

    let table = Table::new(
        rows,
        [
            Constraint::Length(30),
            Constraint::Length(24),
            Constraint::Length(30),
            Constraint::Length(7),
            Constraint::Length(9),
        ],
    )
    .header(header_row(&["Home Email", "Name", "Stores", "Cards", "Physical"]))
    .block(framed(title))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.recipients_state);
}

fn render_donors(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_donors()
        .iter()
        .map(|d| {
            Row::new(vec![
                Cell::from(truncate(&d.email, 30)),
                Cell::from(truncate(&d.name, 24)),
                Cell::from(format!("{}", d.capacity)),
                Cell::from(format!("{}", d.committed())),
                Cell::from(format!("{}", d.remaining())).style(Style::default().fg(
                    if d.remaining() > 0 { Color::Yellow } else { Color::Green },
                )),
                Cell::from(truncate(&d.committed_stores().join("; "), 30)),
            ])
        })
        .collect();
    let title = format!(" Donors ({}) ", rows.len());

    let table = Table::new(
        rows,
        [
            Constraint::Length(30),
            Constraint::Length(24),
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(30),
        ],
    )
    .header(header_row(&["Email", "Name", "Capacity", "Committed", "Remaining", "Stores"]))
    .block(framed(title))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.donors_state);
}

fn render_rounds(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .registry
        .rounds()
        .iter()
        .map(|r| {
            Row::new(vec![
                Cell::from(format!("{}", r.id)),
                Cell::from(r.completed_at.format("%Y-%m-%d %H:%M UTC").to_string()),
                Cell::from(format!("{}", r.new_assignments)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Length(8), Constraint::Length(22), Constraint::Length(12)],
    )
    .header(header_row(&["Round", "Completed", "New Cards"]))
    .block(framed(" Rounds ".to_string()))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.rounds_state);
}

fn label(text: &str) -> Span<'static> {
    Span::styled(
        format!("  {}: ", text),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn section(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("  {}", text),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
    ))
}

fn detail_block(title: &str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" {} ", title))
}

fn render_recipient_detail(f: &mut Frame, area: Rect, app: &App) {
    let r = match app.selected_recipient() {
        Some(r) => r,
        None => {
            let empty = Paragraph::new("No recipient selected").block(detail_block("Recipient"));
            f.render_widget(empty, area);
            return;
        }
    };

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("Home email"), Span::raw(r.home_email.clone())]),
        Line::from(vec![label("Work email"), Span::raw(r.work_email.clone())]),
        Line::from(vec![label("Name"), Span::raw(r.name.clone())]),
        Line::from(vec![
            label("Eligible"),
            Span::raw(if r.valid { "yes".to_string() } else { format!("no ({})", r.employment_status) }),
        ]),
        Line::from(vec![label("Address"), Span::raw(wrap_text(&r.address, 30))]),
        Line::from(vec![label("Phone"), Span::raw(r.phone.clone())]),
        Line::from(vec![label("Stores"), Span::raw(r.stores.join("; "))]),
        Line::from(""),
        section("SLOTS"),
        Line::from(""),
    ];
    for (i, slot) in r.slots.iter().enumerate() {
        let text = match slot {
            Some(s) => format!("  {:>2}. {} ({}, round {})", i + 1, s.donor, s.store, s.round),
            None => format!("  {:>2}. -", i + 1),
        };
        let color = if slot.is_some() { Color::Green } else { Color::DarkGray };
        content.push(Line::from(Span::styled(text, Style::default().fg(color))));
    }
    if !r.comments.is_empty() {
        content.push(Line::from(""));
        content.push(section("COMMENTS"));
        content.push(Line::from(Span::styled(
            format!("  {}", wrap_text(&r.comments, 35)),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    f.render_widget(Paragraph::new(content).block(detail_block("Recipient")), area);
}

fn render_donor_detail(f: &mut Frame, area: Rect, app: &App) {
    let d = match app.selected_donor() {
        Some(d) => d,
        None => {
            let empty = Paragraph::new("No donor selected").block(detail_block("Donor"));
            f.render_widget(empty, area);
            return;
        }
    };

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("Email"), Span::raw(d.email.clone())]),
        Line::from(vec![label("Name"), Span::raw(d.name.clone())]),
        Line::from(vec![
            label("Cards"),
            Span::raw(format!("{} of {} committed", d.committed(), d.capacity)),
        ]),
        Line::from(""),
        section("COMMITMENTS"),
        Line::from(""),
    ];
    for c in &d.commitments {
        content.push(Line::from(format!("  round {}: {} at {}", c.round, c.recipient, c.store)));
    }
    if d.commitments.is_empty() {
        content.push(Line::from(Span::styled(
            "  none yet",
            Style::default().fg(Color::DarkGray),
        )));
    }

    f.render_widget(Paragraph::new(content).block(detail_block("Donor")), area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = match app.current_page {
        Page::Recipients => app.recipients_state.selected(),
        Page::Donors => app.donors_state.selected(),
        Page::Rounds => app.rounds_state.selected(),
    }
    .map(|i| i + 1)
    .unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.page_len()),
        Style::default().fg(Color::Cyan),
    )];

    if app.only_open {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("Filter: open only", Style::default().fg(Color::Green)));
    }

    for (key, what, color) in [
        ("Enter", " Details | ", Color::Yellow),
        ("Tab", " Page | ", Color::Yellow),
        ("f", " Open only | ", Color::Yellow),
        ("↑/↓", " Nav | ", Color::Yellow),
        ("PgUp/PgDn", " Fast | ", Color::Yellow),
        ("q", " Quit", Color::Red),
    ] {
        status_spans.push(Span::styled(key, Style::default().fg(color)));
        status_spans.push(Span::raw(what));
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use donation_match::{DonorRecord, MatchingEngine, RecipientRecord};

    fn app() -> App {
        let mut registry = Registry::new();
        registry
            .upsert_donors(&[
                DonorRecord::new("a@example.com", "A", 1),
                DonorRecord::new("b@example.com", "B", 0),
            ])
            .unwrap();
        registry
            .upsert_recipients(&[
                RecipientRecord::new("r1@example.com", &["Petco"]),
                RecipientRecord::new("r2@example.com", &["Petco"]),
                RecipientRecord::new("r3@example.com", &["Petco"]),
            ])
            .unwrap();
        MatchingEngine::new().run_round(&mut registry).unwrap();
        App::new(registry)
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app();
        assert_eq!(app.recipients_state.selected(), Some(0));
        app.previous();
        assert_eq!(app.recipients_state.selected(), Some(2));
        app.next();
        assert_eq!(app.recipients_state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.recipients_state.selected(), Some(2));
        app.page_up();
        assert_eq!(app.recipients_state.selected(), Some(0));
    }

    #[test]
    fn test_pages_cycle() {
        let mut app = app();
        app.next_page();
        assert_eq!(app.current_page, Page::Donors);
        app.next_page();
        assert_eq!(app.current_page, Page::Rounds);
        app.next_page();
        assert_eq!(app.current_page, Page::Recipients);
        app.previous_page();
        assert_eq!(app.current_page, Page::Rounds);
    }

    #[test]
    fn test_only_open_filters_donors() {
        let mut app = app();
        // A gave its one card; B never had capacity
        assert_eq!(app.visible_donors().len(), 2);
        app.toggle_only_open();
        assert!(app.visible_donors().is_empty());
        assert_eq!(app.donors_state.selected(), None);
        assert_eq!(app.visible_recipients().len(), 3);
    }

    #[test]
    fn test_selected_recipient_follows_state() {
        let mut app = app();
        app.next();
        assert_eq!(app.selected_recipient().unwrap().home_email, "r2@example.com");
    }

    #[test]
    fn test_wrap_and_truncate() {
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("abc", 6), "abc");
        assert_eq!(wrap_text("one two three", 7), "one two\n  three");
    }
}
