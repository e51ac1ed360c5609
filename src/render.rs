use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};
use pixelpen_common::{Channel, ColorMode, RGB8, Renderer, Snapshot};
use std::io::{self, Stdout, Write};

const HELP: [&str; 4] = [
    "arrows move (shift x3, ctrl x12)   f fill   c clear   space show",
    "+/- pen   m mono/color   [ ] channel   , . brightness",
    "q or ctrl+c quit",
    "",
];

#[inline]
fn encode_dec(buf: &mut itoa::Buffer, num: impl itoa::Integer) -> &str {
    buf.format(num)
}

/// Strip index shown in `column` when `width` columns sample `count` LEDs.
fn sample_index(column: usize, width: usize, count: usize) -> usize {
    if width == 0 {
        return 0;
    }
    (column * count / width).min(count.saturating_sub(1))
}

fn column_of(index: usize, width: usize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    (index * width / count).min(width.saturating_sub(1))
}

fn mode_label(mode: ColorMode, channel: Channel) -> String {
    match mode {
        ColorMode::Mono => "mono".to_owned(),
        ColorMode::Color => format!("color ({channel})"),
    }
}

/// Full-screen status view. Expects a [`crate::terminal::TerminalSession`]
/// to be alive.
pub struct TerminalRenderer {
    out: Stdout,
    num_buf: itoa::Buffer,
    failed: bool,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self {
            out: io::stdout(),
            num_buf: itoa::Buffer::new(),
            failed: false,
        }
    }

    fn rgb(&mut self, label: &str, color: RGB8) -> io::Result<()> {
        queue!(self.out, Print(label))?;
        for channel in [color.r, color.g, color.b] {
            queue!(self.out, Print(" "), Print(encode_dec(&mut self.num_buf, channel)))?;
        }
        Ok(())
    }

    fn line(&mut self, row: u16) -> io::Result<()> {
        queue!(self.out, MoveTo(0, row), Clear(ClearType::CurrentLine))
    }

    fn draw(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()> {
        let (columns, _) = terminal::size()?;
        let width = usize::from(columns.max(1));
        let count = snapshot.led_count();

        self.line(0)?;
        queue!(self.out, Print("pixelpen"))?;

        self.line(1)?;
        queue!(
            self.out,
            Print(format!(
                "port {} | leds {} | fps {} | brightness {} | mode {} | kbd {}",
                snapshot.transport,
                count,
                snapshot.fps,
                snapshot.global_brightness,
                mode_label(snapshot.mode, snapshot.channel),
                snapshot.input,
            ))
        )?;

        self.line(3)?;
        queue!(
            self.out,
            Print("selected "),
            Print(encode_dec(&mut self.num_buf, snapshot.selected))
        )?;

        self.line(4)?;
        self.rgb("pixel", snapshot.selected_rgb8())?;
        self.rgb("   pen", snapshot.pen)?;

        self.line(6)?;
        for column in 0..width {
            let pixel = &snapshot.pixels[sample_index(column, width, count)];
            let color = pixel.rgb8();
            let glyph = if pixel.is_active() { "█" } else { "·" };
            queue!(
                self.out,
                SetForegroundColor(Color::Rgb {
                    r: color.r,
                    g: color.g,
                    b: color.b,
                }),
                Print(glyph)
            )?;
        }
        queue!(self.out, ResetColor)?;

        self.line(7)?;
        let marker = column_of(usize::from(snapshot.selected), width, count);
        queue!(
            self.out,
            MoveTo(marker as u16, 7),
            Print("^"),
            Print(encode_dec(&mut self.num_buf, snapshot.selected))
        )?;

        for (offset, help) in HELP.iter().enumerate() {
            self.line(9 + offset as u16)?;
            queue!(self.out, Print(help))?;
        }

        self.out.flush()
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, snapshot: &Snapshot<'_>) {
        if let Err(error) = self.draw(snapshot) {
            // once, not every frame
            if !self.failed {
                warn!(%error, "drawing the terminal failed");
                self.failed = true;
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Shown {
    selected: u16,
    pen: RGB8,
    mode: ColorMode,
    channel: Channel,
    global_brightness: u8,
}

/// Logs instead of drawing, and only when something visible changed.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    last: Option<Shown>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for HeadlessRenderer {
    fn render(&mut self, snapshot: &Snapshot<'_>) {
        let shown = Shown {
            selected: snapshot.selected,
            pen: snapshot.pen,
            mode: snapshot.mode,
            channel: snapshot.channel,
            global_brightness: snapshot.global_brightness,
        };
        if self.last.as_ref() == Some(&shown) {
            return;
        }

        info!(
            selected = shown.selected,
            pen = ?(shown.pen.r, shown.pen.g, shown.pen.b),
            mode = %mode_label(shown.mode, shown.channel),
            brightness = shown.global_brightness,
            "state"
        );
        self.last = Some(shown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixelpen_common::{Pixel, PixelArray};
    use std::num::NonZeroU16;

    fn snapshot(pixels: &[Pixel], selected: u16) -> Snapshot<'_> {
        Snapshot {
            selected,
            mode: ColorMode::Color,
            channel: Channel::Green,
            pixels,
            pen: RGB8::new(1, 2, 3),
            global_brightness: 64,
            fps: 50,
            transport: "dry-run",
            input: "scripted",
        }
    }

    #[test]
    fn sampling_covers_the_whole_strip() {
        assert_eq!(sample_index(0, 80, 288), 0);
        assert_eq!(sample_index(79, 80, 288), 284);
        assert_eq!(sample_index(5, 80, 3), 0);
        assert_eq!(sample_index(79, 80, 3), 2);
        assert_eq!(sample_index(3, 0, 10), 0);
    }

    #[test]
    fn marker_stays_on_screen() {
        assert_eq!(column_of(0, 80, 288), 0);
        assert_eq!(column_of(287, 80, 288), 79);
        assert_eq!(column_of(2, 80, 3), 53);
    }

    #[test]
    fn mode_labels() {
        assert_eq!(mode_label(ColorMode::Mono, Channel::Red), "mono");
        assert_eq!(mode_label(ColorMode::Color, Channel::Blue), "color (B)");
    }

    #[test]
    fn headless_only_remembers_changes() {
        let array = PixelArray::new(NonZeroU16::new(4).unwrap());
        let mut renderer = HeadlessRenderer::new();

        renderer.render(&snapshot(array.pixels(), 0));
        let first = renderer.last.clone();
        assert_eq!(first.as_ref().map(|shown| shown.selected), Some(0));

        renderer.render(&snapshot(array.pixels(), 0));
        assert_eq!(renderer.last, first);

        renderer.render(&snapshot(array.pixels(), 2));
        assert_eq!(renderer.last.map(|shown| shown.selected), Some(2));
    }
}
