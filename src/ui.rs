use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, TableState, Wrap,
};

use crate::app::App;
use crate::keys::{Binding, CommandId};
use crate::model::{ListEntry, Loadable, PageData, ResourceDetail, ResourceTable};
use crate::page::{InputKind, Page};
use crate::tabs::Tab;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const SELECTED: Color = Color::Rgb(24, 36, 58);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const SIDEBAR_WIDTH: u16 = 26;

pub fn render(frame: &mut Frame, app: &App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    let current = app.snapshot().current_tab();
    let location = current
        .map(|tab| {
            let context = non_empty_or(&tab.k8s_context, "no context");
            match tab.k8s_namespace.as_str() {
                "" => context.to_string(),
                namespace => format!("{context}/{namespace}"),
            }
        })
        .unwrap_or_else(|| "no tab".to_string());

    push_powerline_segment(&mut spans, " ⎈ skiff ", Color::White, PL_A, PL_B);
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&location, 40)),
        Color::White,
        PL_B,
        PL_C,
    );
    let crumbs = app
        .visible_page()
        .map(|page| {
            page.path()
                .breadcrumbs()
                .into_iter()
                .map(|(title, _)| title)
                .collect::<Vec<_>>()
                .join(" › ")
        })
        .unwrap_or_default();
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&crumbs, area.width.saturating_sub(50) as usize)),
        Color::White,
        PL_C,
        BG,
    );

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
        .split(area);

    render_sidebar(frame, chunks[0], app);
    match app.visible_page() {
        Some(page) => render_page(frame, chunks[1], page),
        None => render_empty_shell(frame, chunks[1], app),
    }
}

fn render_sidebar(frame: &mut Frame, area: Rect, app: &App) {
    let snapshot = app.snapshot();
    let items = snapshot
        .tabs
        .iter()
        .enumerate()
        .map(|(index, tab)| {
            ListItem::new(compact_text(
                &tab_label(index, tab),
                SIDEBAR_WIDTH.saturating_sub(5) as usize,
            ))
        })
        .collect::<Vec<_>>();
    let selected = snapshot
        .current
        .as_deref()
        .and_then(|id| snapshot.tabs.iter().position(|tab| tab.id == id));

    let list = List::new(items)
        .block(
            Block::default()
                .title(format!("Tabs ({})", snapshot.tabs.len()))
                .borders(Borders::ALL)
                .border_style(focus_border(app.shell_has_focus()))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().bg(SELECTED).add_modifier(Modifier::BOLD))
        .highlight_symbol("▌");

    let mut state = ListState::default();
    state.select(selected);
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_empty_shell(frame: &mut Frame, area: Rect, app: &App) {
    let hint = binding_for(app.shell_bindings(), CommandId::NewTab)
        .map(|binding| format!("Press {} to open a tab.", binding.chord))
        .unwrap_or_else(|| "No binding opens a tab.".to_string());
    let paragraph = Paragraph::new(Text::from(vec![
        Line::from(Span::styled("No open tabs", Style::default().fg(MUTED))),
        Line::from(Span::styled(hint, Style::default().fg(Color::White))),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(MUTED))
            .style(Style::default().bg(PANEL)),
    );
    frame.render_widget(paragraph, area);
}

fn render_page(frame: &mut Frame, area: Rect, page: &Page) {
    let (content_area, input_area) = match page.input() {
        Some(_) => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(1)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        }
        None => (area, None),
    };

    let title = page_title(page);
    let focused = page.is_focused();
    match page.data() {
        Loadable::Pending => render_placeholder(frame, content_area, &title, "Loading…", MUTED),
        Loadable::Errored(error) => render_placeholder(frame, content_area, &title, error, ERROR),
        Loadable::Ready(data) | Loadable::Refreshing(data) if data.is_empty() => {
            render_placeholder(frame, content_area, &title, "no data", MUTED)
        }
        Loadable::Ready(data) | Loadable::Refreshing(data) => match data {
            PageData::Contexts(_) => render_entries(
                frame,
                content_area,
                page,
                &title,
                &["", "NAME", "CLUSTER"],
                focused,
            ),
            PageData::Namespaces(_) => {
                render_entries(frame, content_area, page, &title, &["NAME"], focused)
            }
            PageData::Resources(tables) => {
                render_resource_tables(frame, content_area, page, tables, &title, focused)
            }
            PageData::Resource(detail) => {
                render_resource_detail(frame, content_area, page, detail, &title, focused)
            }
        },
    }

    if let (Some(area), Some(input)) = (input_area, page.input()) {
        let prompt = match input.kind {
            InputKind::Filter => "/",
            InputKind::CommandBar => ":",
        };
        let line = Line::from(vec![
            Span::styled(prompt, Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
            Span::styled(input.text.clone(), Style::default().fg(Color::White)),
        ]);
        frame.render_widget(Paragraph::new(line).style(Style::default().bg(BG)), area);
        let cursor_x = area.x + 1 + input.text.chars().count() as u16;
        frame.set_cursor_position((cursor_x.min(area.right().saturating_sub(1)), area.y));
    }
}

fn render_placeholder(frame: &mut Frame, area: Rect, title: &str, message: &str, color: Color) {
    let paragraph = Paragraph::new(Text::from(message.to_string()))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(if color == ERROR { ERROR } else { MUTED }))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(color));
    frame.render_widget(paragraph, area);
}

fn render_entries(
    frame: &mut Frame,
    area: Rect,
    page: &Page,
    title: &str,
    headers: &[&str],
    focused: bool,
) {
    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(header.to_string()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().fg(ACCENT));

    let rows = page.list().visible_entries().map(|entry| {
        let style = if entry.marked {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(Color::White)
        };
        Row::new(entry.cells.iter().cloned().map(Cell::from)).style(style)
    });

    let widths = if headers.first() == Some(&"") {
        let mut widths = vec![Constraint::Length(1)];
        widths.extend(column_constraints(headers.len() - 1));
        widths
    } else {
        column_constraints(headers.len())
    };
    let table = Table::new(rows, widths)
        .header(header_row)
        .block(page_block(title, focused))
        .column_spacing(1)
        .row_highlight_style(Style::default().bg(SELECTED).add_modifier(Modifier::BOLD))
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select((!page.list().is_empty()).then(|| page.list().highlighted()));
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_resource_tables(
    frame: &mut Frame,
    area: Rect,
    page: &Page,
    tables: &[ResourceTable],
    title: &str,
    focused: bool,
) {
    let entries = page.list().visible_entries().collect::<Vec<_>>();
    let (rows, selected) = grouped_rows(tables, &entries, page.list().highlighted());
    let columns = tables
        .iter()
        .map(|table| table.headers.len())
        .max()
        .unwrap_or(1);

    let table = Table::new(rows, column_constraints(columns))
        .block(page_block(title, focused))
        .column_spacing(1)
        .row_highlight_style(Style::default().bg(SELECTED).add_modifier(Modifier::BOLD))
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(selected);
    frame.render_stateful_widget(table, area, &mut state);
}

/// One block per resource kind: a title row, its column headers, then its
/// visible rows. Returns the rows and the row index of the highlighted entry.
fn grouped_rows(
    tables: &[ResourceTable],
    entries: &[&ListEntry],
    highlighted: usize,
) -> (Vec<Row<'static>>, Option<usize>) {
    let mut rows = Vec::new();
    let mut selected = None;
    let mut entry_index = 0;

    for (section, table) in tables.iter().enumerate() {
        let section_entries = entries
            .iter()
            .skip(entry_index)
            .take_while(|entry| entry.section == section)
            .collect::<Vec<_>>();
        if section_entries.is_empty() {
            continue;
        }

        let title_style = if table.is_error {
            Style::default().fg(ERROR).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(WARN).add_modifier(Modifier::BOLD)
        };
        rows.push(
            Row::new(vec![Cell::from(format!(
                "{} ({})",
                table.kind,
                table.api_version()
            ))])
            .style(title_style),
        );
        rows.push(
            Row::new(table.headers.iter().cloned().map(Cell::from))
                .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
        );

        for entry in section_entries {
            if entry_index == highlighted {
                selected = Some(rows.len());
            }
            let style = if table.is_error {
                Style::default().fg(ERROR)
            } else {
                Style::default().fg(Color::White)
            };
            rows.push(Row::new(entry.cells.iter().cloned().map(Cell::from)).style(style));
            entry_index += 1;
        }
    }

    (rows, selected)
}

fn render_resource_detail(
    frame: &mut Frame,
    area: Rect,
    page: &Page,
    detail: &ResourceDetail,
    title: &str,
    focused: bool,
) {
    let references = page.list().visible_entries().collect::<Vec<_>>();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length((references.len() as u16).clamp(1, 8) + 2),
        ])
        .split(area);
    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[0]);

    let describe = Paragraph::new(Text::from(detail.describe.clone()))
        .wrap(Wrap { trim: false })
        .block(page_block(title, false))
        .style(Style::default().fg(Color::White));
    frame.render_widget(describe, panes[0]);

    let yaml = Paragraph::new(highlight_yaml_text(&detail.yaml))
        .wrap(Wrap { trim: false })
        .block(page_block("YAML", false));
    frame.render_widget(yaml, panes[1]);

    let items = if references.is_empty() {
        vec![ListItem::new(Span::styled(
            "no references",
            Style::default().fg(MUTED),
        ))]
    } else {
        references
            .iter()
            .map(|entry| ListItem::new(entry.label.clone()))
            .collect()
    };
    let list = List::new(items)
        .block(page_block("References", focused))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().bg(SELECTED).add_modifier(Modifier::BOLD))
        .highlight_symbol("󰜴 ");
    let mut state = ListState::default();
    state.select((!references.is_empty()).then(|| page.list().highlighted()));
    frame.render_stateful_widget(list, chunks[1], &mut state);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    let message = app.visible_page().and_then(Page::message);
    let (status, status_bg, status_fg) = match message {
        Some(message) => (message.to_string(), WARN, Color::Black),
        None => (app.status().to_string(), PL_B, Color::White),
    };
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&status, 48)),
        status_fg,
        status_bg,
        BG,
    );

    let mut hints = binding_hints(app.shell_bindings());
    if app.visible_page().is_some() {
        hints.extend(binding_hints(&app.page_bindings()));
    }
    hints.push("ctrl+q quit".to_string());
    spans.push(Span::styled(
        format!(" {}", hints.join(" · ")),
        Style::default().fg(MUTED),
    ));
    if let Some(source) = app.config_source() {
        spans.push(Span::styled(
            format!("  [{}]", compact_text(source, 32)),
            Style::default().fg(MUTED),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn page_title(page: &Page) -> String {
    let mut title = page.path().title();
    let filter = page.list().filter();
    if !filter.is_empty() {
        title.push_str(&format!(" /{filter}"));
    }
    if page.data().is_loading() {
        title.push_str(" ↻");
    } else if let Some(loaded_at) = page.loaded_at() {
        title.push_str(&format!(" · {}", loaded_at.format("%H:%M:%S")));
    }
    title
}

fn page_block(title: &str, focused: bool) -> Block<'static> {
    Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(focus_border(focused))
        .style(Style::default().bg(PANEL))
}

fn focus_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(MUTED)
    }
}

fn tab_label(index: usize, tab: &Tab) -> String {
    let title = if tab.title.is_empty() {
        "new tab"
    } else {
        tab.title.as_str()
    };
    format!("{} {title}", index + 1)
}

fn binding_for(bindings: &[Binding], command: CommandId) -> Option<&Binding> {
    bindings.iter().find(|binding| binding.command == command)
}

fn binding_hints(bindings: &[Binding]) -> Vec<String> {
    bindings
        .iter()
        .filter(|binding| binding.command != CommandId::NoOp)
        .map(|binding| format!("{} {}", binding.chord, binding.command))
        .collect()
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn highlight_yaml_text(input: &str) -> Text<'static> {
    let lines = input
        .lines()
        .map(highlight_yaml_line)
        .collect::<Vec<Line<'static>>>();
    Text::from(lines)
}

fn highlight_yaml_line(line: &str) -> Line<'static> {
    let indent_len = line
        .as_bytes()
        .iter()
        .take_while(|byte| **byte == b' ')
        .count();
    let (indent, trimmed) = line.split_at(indent_len);

    let mut spans = vec![Span::raw(indent.to_string())];
    if let Some(rest) = trimmed.strip_prefix("- ") {
        spans.push(Span::styled("- ", Style::default().fg(ACCENT)));
        spans.extend(highlight_yaml_content(rest));
    } else if !trimmed.is_empty() {
        spans.extend(highlight_yaml_content(trimmed));
    }
    Line::from(spans)
}

fn highlight_yaml_content(content: &str) -> Vec<Span<'static>> {
    let Some((key, value)) = content
        .split_once(':')
        .filter(|(key, _)| !key.is_empty() && !key.contains(' '))
    else {
        return vec![Span::styled(
            content.to_string(),
            Style::default().fg(Color::White),
        )];
    };

    let mut spans = vec![
        Span::styled(key.to_string(), Style::default().fg(Color::Rgb(103, 232, 249))),
        Span::styled(":", Style::default().fg(MUTED)),
    ];
    let value = value.trim();
    if !value.is_empty() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            value.to_string(),
            Style::default().fg(yaml_value_color(value)),
        ));
    }
    spans
}

fn yaml_value_color(value: &str) -> Color {
    if value.starts_with('"') || value.starts_with('\'') {
        Color::Rgb(125, 211, 252)
    } else if matches!(value, "true" | "false" | "null" | "~") {
        WARN
    } else if value.parse::<f64>().is_ok() {
        Color::Rgb(251, 146, 60)
    } else {
        Color::Rgb(147, 197, 253)
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn column_constraints(columns: usize) -> Vec<Constraint> {
    if columns == 0 {
        return vec![Constraint::Percentage(100)];
    }

    let width = (100 / columns as u16).max(1);
    (0..columns)
        .map(|_| Constraint::Percentage(width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{binding_hints, compact_text, grouped_rows, render, tab_label};
    use crate::app::App;
    use crate::config::KeymapSnapshot;
    use crate::k8s::fake::FakeCluster;
    use crate::keys::default_shell_bindings;
    use crate::model::{ListEntry, ResourceTable};
    use crate::relay::ChannelCounterpart;
    use crate::tab_store::{LocalTabBackend, TabStore};
    use crate::tabs::{Tab, TabSet};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::rc::Rc;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn render_to_string(app: &App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| render(frame, app)).unwrap();

        let buffer = terminal.backend().buffer();
        let area = buffer.area;
        (area.y..area.bottom())
            .map(|y| {
                (area.x..area.right())
                    .map(|x| buffer[(x, y)].symbol().to_string())
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn entry(label: &str, section: usize) -> ListEntry {
        ListEntry {
            label: label.to_string(),
            cells: vec![label.to_string()],
            section,
            marked: false,
            target: None,
        }
    }

    #[test]
    fn empty_shell_explains_how_to_open_a_tab() {
        let (tabs_tx, _tabs_rx) = mpsc::unbounded_channel();
        let (relay_tx, _relay_rx) = mpsc::unbounded_channel();
        let (pages_tx, _pages_rx) = mpsc::unbounded_channel();
        let store = TabStore::new(
            Arc::new(LocalTabBackend::new(TabSet::new(), None)),
            tabs_tx,
        );
        let app = App::new(
            store,
            Arc::new(FakeCluster),
            Rc::new(ChannelCounterpart::new(relay_tx)),
            pages_tx,
            KeymapSnapshot::default(),
        );

        let screen = render_to_string(&app, 220, 12);
        assert!(screen.contains("Tabs (0)"));
        assert!(screen.contains("No open tabs"));
        assert!(screen.contains("Press meta+KeyT to open a tab."));
        assert!(screen.contains("ctrl+q quit"));
    }

    #[test]
    fn grouped_rows_place_selection_after_section_headers() {
        let tables = vec![
            ResourceTable {
                version: "v1".to_string(),
                kind: "Pod".to_string(),
                headers: vec!["Name".to_string()],
                ..ResourceTable::default()
            },
            ResourceTable {
                group: "apps".to_string(),
                version: "v1".to_string(),
                kind: "Deployment".to_string(),
                headers: vec!["Name".to_string()],
                ..ResourceTable::default()
            },
        ];
        let entries = [entry("web-0", 0), entry("web-1", 0), entry("web", 1)];
        let refs = entries.iter().collect::<Vec<_>>();

        let (rows, selected) = grouped_rows(&tables, &refs, 0);
        assert_eq!(rows.len(), 7);
        assert_eq!(selected, Some(2));

        let (_, selected) = grouped_rows(&tables, &refs, 2);
        assert_eq!(selected, Some(6));

        let filtered = [&entries[2]];
        let (rows, selected) = grouped_rows(&tables, &filtered, 0);
        assert_eq!(rows.len(), 3);
        assert_eq!(selected, Some(2));
    }

    #[test]
    fn tab_labels_fall_back_for_untitled_tabs() {
        let mut tab = Tab {
            id: "a".to_string(),
            ..Tab::default()
        };
        assert_eq!(tab_label(0, &tab), "1 new tab");
        tab.title = "pods".to_string();
        assert_eq!(tab_label(2, &tab), "3 pods");
    }

    #[test]
    fn hints_skip_noop_bindings() {
        let hints = binding_hints(&default_shell_bindings());
        assert_eq!(hints.len(), 4);
        assert_eq!(hints[0], "meta+KeyT new-tab");
    }

    #[test]
    fn compact_text_truncates_with_ellipsis() {
        assert_eq!(compact_text("kube-system", 20), "kube-system");
        assert_eq!(compact_text("kube-system", 5), "kube…");
        assert_eq!(compact_text("kube-system", 1), "…");
    }
}
