use crate::control::{PlayState, Status};
use crate::visualizer::{SpectrumView, BAR_HEIGHT};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use std::io;
use std::time::Duration;

const PROGRESS_CELLS: u128 = 30;
const VOLUME_CELLS: u32 = 20;
const PARTIAL: [char; 7] = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];

pub const CONTROLS: &[&str] = &[
    "Press i or ↑ to increase volume",
    "Press o or ↓ to decrease volume",
    "Press l or → to move forwards 5s",
    "Press k or ← to move backwards 5s",
    "Press p to pause/unpause",
    "Press s to stop and pick another song",
    "Press q to quit",
    "Press r to remove current song from your history",
];

pub struct UiState {
    pub title: Option<String>,
    pub status: Status,
    /// Length reported when the query was resolved, used while the player reports none.
    pub expected_length: Option<Duration>,
    pub spectrum: SpectrumView,
}

impl UiState {
    pub fn new(title: Option<String>, expected_length: Option<Duration>) -> Self {
        Self {
            title,
            status: Status::default(),
            expected_length,
            spectrum: SpectrumView::default(),
        }
    }

    /// Takes a fresh status, or keeps the last known numbers with an unknown state.
    pub fn observe(&mut self, status: Option<Status>) {
        match status {
            Some(status) => self.status = status,
            None => self.status.state = PlayState::Unknown,
        }
    }

    fn length(&self) -> Duration {
        if self.status.length.is_zero() {
            self.expected_length.unwrap_or_default()
        } else {
            self.status.length
        }
    }
}

pub fn clock(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// `[bar] elapsed / total [remaining]` with eighth-cell resolution.
pub fn progress_line(position: Duration, length: Duration) -> String {
    let len_ms = length.as_millis();
    let pos_ms = position.as_millis().min(len_ms);
    let eighths = if len_ms == 0 {
        0
    } else {
        pos_ms * PROGRESS_CELLS * 8 / len_ms
    };

    let whole = usize::try_from(eighths / 8).unwrap_or(0);
    let remainder = usize::try_from(eighths % 8).unwrap_or(0);
    let mut bar = "█".repeat(whole);
    let mut used = whole;
    if remainder > 0 {
        bar.push(PARTIAL[remainder - 1]);
        used += 1;
    }
    let cells = usize::try_from(PROGRESS_CELLS).unwrap_or(30);
    bar.push_str(&" ".repeat(cells.saturating_sub(used)));

    let remaining = length.saturating_sub(position);
    format!(
        "[{bar}] {} / {} [{} remaining]",
        clock(position),
        clock(length),
        clock(remaining)
    )
}

/// Volume in display units (256 == 100%); above 100% is labelled, not capped.
pub fn volume_line(volume: u16) -> String {
    let percent = u32::from(volume) * 100 / 256;
    let filled = (VOLUME_CELLS * percent.min(100) / 100) as usize;
    let empty = VOLUME_CELLS as usize - filled;
    let suffix = if percent > 100 { " (AMPLIFIED)" } else { "" };
    format!(
        "[{}{}] {percent}%{suffix} VOL",
        "█".repeat(filled),
        "░".repeat(empty)
    )
}

fn state_span(state: PlayState) -> Span<'static> {
    let bright = Modifier::BOLD;
    match state {
        PlayState::Paused => Span::styled(
            "⏸  PAUSED",
            Style::default().fg(Color::Yellow).add_modifier(bright),
        ),
        PlayState::Playing => Span::styled(
            "▶  PLAYING",
            Style::default().fg(Color::Green).add_modifier(bright),
        ),
        other => Span::styled(
            format!("State: {}", other.label()),
            Style::default().fg(Color::Red).add_modifier(bright),
        ),
    }
}

/// Bar rows, top row first; each bar is a cell plus a gap.
pub fn spectrum_rows(bars: &[u8], height: u8) -> Vec<Line<'static>> {
    (0..height)
        .rev()
        .map(|row| {
            let color = if row < height / 3 {
                Color::Red
            } else if row < 2 * height / 3 {
                Color::Yellow
            } else {
                Color::Green
            };
            let spans: Vec<Span> = bars
                .iter()
                .map(|bar| {
                    if *bar > row {
                        Span::styled("█ ", Style::default().fg(color))
                    } else {
                        Span::raw("  ")
                    }
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

fn visualizer_lines(state: &UiState) -> Vec<Line<'static>> {
    match &state.spectrum {
        SpectrumView::Unavailable(reason) => vec![Line::from(reason.clone())],
        SpectrumView::Bars(_) if state.status.state != PlayState::Playing => {
            vec![Line::from(Span::styled(
                "Audio Visualizer: (paused)",
                Style::default().fg(Color::Magenta),
            ))]
        }
        SpectrumView::Bars(bars) => spectrum_rows(bars, BAR_HEIGHT),
    }
}

pub fn draw_ui<B: Backend>(terminal: &mut Terminal<B>, state: &UiState) -> io::Result<()> {
    terminal.draw(|f| {
        let size = f.size();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Length(4),
                Constraint::Length(u16::from(BAR_HEIGHT) + 2),
                Constraint::Min(0),
            ])
            .split(size);

        let mut now_playing = vec![Line::from(state_span(state.status.state))];
        if let Some(title) = &state.title {
            now_playing.push(Line::from(Span::styled(
                title.clone(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )));
        }
        let header = Paragraph::new(now_playing)
            .block(Block::default().borders(Borders::ALL).title("Now Playing"));
        f.render_widget(header, chunks[0]);

        let status_text = vec![
            Line::from(progress_line(state.status.position, state.length())),
            Line::from(volume_line(state.status.volume)),
        ];
        let status = Paragraph::new(status_text)
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[1]);

        let visualizer = Paragraph::new(visualizer_lines(state))
            .block(Block::default().borders(Borders::ALL).title("Visualizer"));
        f.render_widget(visualizer, chunks[2]);

        let controls: Vec<Line> = CONTROLS.iter().map(|line| Line::from(*line)).collect();
        let controls = Paragraph::new(controls)
            .block(Block::default().borders(Borders::ALL).title("Controls"));
        f.render_widget(controls, chunks[3]);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer.get(x, y).symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn exact_cell_boundary_has_no_partial_glyph() {
        let line = progress_line(secs(30), secs(180));
        let bar = line.split(']').next().unwrap().trim_start_matches('[');
        assert_eq!(bar.chars().count(), 30);
        assert_eq!(bar.chars().filter(|c| *c == '█').count(), 5);
        assert!(!bar.chars().any(|c| PARTIAL.contains(&c)));
        assert!(line.ends_with("00:30 / 03:00 [02:30 remaining]"));
    }

    #[test]
    fn fractional_fill_uses_eighth_glyphs() {
        // 45/180 of 30 cells is 7.5 cells: seven full and a half block
        let line = progress_line(secs(45), secs(180));
        let bar = line.split(']').next().unwrap().trim_start_matches('[');
        assert_eq!(bar.chars().filter(|c| *c == '█').count(), 7);
        assert_eq!(bar.chars().nth(7), Some('▌'));
        assert_eq!(bar.chars().count(), 30);
    }

    #[test]
    fn unknown_length_renders_empty_bar() {
        let line = progress_line(secs(12), Duration::ZERO);
        assert!(line.starts_with(&format!("[{}]", " ".repeat(30))));
        assert!(line.contains("00:12 / 00:00 [00:00 remaining]"));
    }

    #[test]
    fn position_past_end_fills_the_bar() {
        let line = progress_line(secs(200), secs(180));
        assert!(line.starts_with(&format!("[{}]", "█".repeat(30))));
    }

    #[test]
    fn volume_above_full_scale_is_amplified() {
        assert_eq!(volume_line(128), format!("[{}{}] 50% VOL", "█".repeat(10), "░".repeat(10)));
        let loud = volume_line(320);
        assert!(loud.starts_with(&format!("[{}]", "█".repeat(20))));
        assert!(loud.ends_with("125% (AMPLIFIED) VOL"));
        assert!(!volume_line(256).contains("AMPLIFIED"));
    }

    #[test]
    fn missing_status_keeps_numbers_but_marks_unknown() {
        let mut state = UiState::new(None, None);
        state.observe(Some(Status {
            position: secs(10),
            length: secs(100),
            state: PlayState::Playing,
            volume: 256,
        }));
        state.observe(None);
        assert_eq!(state.status.state, PlayState::Unknown);
        assert_eq!(state.status.position, secs(10));
    }

    #[test]
    fn resolver_length_fills_in_for_player_length() {
        let state = UiState::new(None, Some(secs(240)));
        assert_eq!(state.length(), secs(240));
    }

    #[test]
    fn frame_shows_state_title_and_help() {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let mut state = UiState::new(Some("Test Song - Test Artist".to_string()), None);
        state.observe(Some(Status {
            position: secs(30),
            length: secs(180),
            state: PlayState::Paused,
            volume: 128,
        }));

        draw_ui(&mut terminal, &state).unwrap();
        let text = screen(&terminal);

        assert!(text.contains("PAUSED"));
        assert!(text.contains("Test Song - Test Artist"));
        assert!(text.contains("00:30 / 03:00"));
        assert!(text.contains("50% VOL"));
        assert!(text.contains("Press q to quit"));
    }

    #[test]
    fn frame_without_title_omits_title_line() {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let state = UiState::new(None, None);
        draw_ui(&mut terminal, &state).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("State: unknown"));
        assert!(text.contains("Now Playing"));
    }

    fn playing(volume: u16) -> Status {
        Status {
            position: secs(30),
            length: secs(180),
            state: PlayState::Playing,
            volume,
        }
    }

    #[test]
    fn spectrum_rows_fill_from_the_bottom() {
        let rows = spectrum_rows(&[0, 3, 1], 3);
        let text: Vec<String> = rows
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect();
        assert_eq!(text, ["  █   ", "  █   ", "  █ █ "]);
        assert_eq!(rows[2].spans[1].style.fg, Some(Color::Red));
        assert_eq!(rows[0].spans[1].style.fg, Some(Color::Green));
    }

    #[test]
    fn playing_frame_shows_spectrum() {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let mut state = UiState::new(None, None);
        state.observe(Some(playing(256)));
        state.spectrum = SpectrumView::Bars(vec![BAR_HEIGHT; 3]);

        draw_ui(&mut terminal, &state).unwrap();
        let text = screen(&terminal);

        assert!(text.contains("Visualizer"));
        assert!(text.contains("█ █ █"));
        assert!(!text.contains("(paused)"));
    }

    #[test]
    fn paused_frame_hides_spectrum() {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let mut state = UiState::new(None, None);
        state.observe(Some(Status {
            state: PlayState::Paused,
            ..playing(256)
        }));
        state.spectrum = SpectrumView::Bars(vec![BAR_HEIGHT; 3]);

        draw_ui(&mut terminal, &state).unwrap();
        let text = screen(&terminal);

        assert!(text.contains("Audio Visualizer: (paused)"));
        assert!(!text.contains("█ █ █"));
    }

    #[test]
    fn missing_capture_is_explained_in_the_frame() {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        let mut state = UiState::new(None, None);
        state.observe(Some(playing(256)));

        draw_ui(&mut terminal, &state).unwrap();

        assert!(screen(&terminal).contains("Audio visualizer not available"));
    }
}
