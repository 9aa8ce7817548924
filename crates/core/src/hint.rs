use anyhow::Result;

use crate::detect::TextReader;
use crate::types::{Capture, TextHit};

// Only the top-left corner of a frame is searched for a strip.
const SCAN_ROWS: u32 = 60;
const SCAN_COLS: u32 = 200;

const MARK_LOW: u8 = 0x00;
const MARK_HIGH: u8 = 0x7F;

/// Extract a 7-bit value from a single pixel in a Capture buffer.
/// Encoding: G[6:4] << 4 | R[6:5] << 2 | B[6:5]
/// Capture is always BGRA byte order.
fn cell_value(capture: &Capture, x: u32, y: u32) -> u8 {
    let [b, g, r, _] = capture.pixel(x, y);

    let r_bits = (r >> 5) & 0x03;
    let g_bits = (g >> 4) & 0x07;
    let b_bits = (b >> 5) & 0x03;

    (g_bits << 4) | (r_bits << 2) | b_bits
}

/// Inverse of [`cell_value`].
fn value_pixel(v: u8) -> [u8; 4] {
    let b = (v & 0x03) << 5;
    let r = ((v >> 2) & 0x03) << 5;
    let g = ((v >> 4) & 0x07) << 4;
    [b, g, r, 255]
}

#[derive(Debug, Clone)]
struct Run {
    c: u8,
    n: u32, // consecutive pixels with this value
}

/// Decode a text strip from a capture.
///
/// A strip is `[0x00][0x7F] data [0x7F][0x00]` where each marker and each
/// character occupies the same number of pixels. Every 3rd row of the top of
/// the frame is tried; returns the first row that decodes.
pub fn decode_strip(capture: &Capture) -> Option<String> {
    (0..capture.height.min(SCAN_ROWS))
        .step_by(3)
        .find_map(|y| decode_row(capture, y))
}

fn decode_row(capture: &Capture, y: u32) -> Option<String> {
    #[derive(Debug, PartialEq)]
    enum State {
        Start,
        Low,    // leading 0x00 marker
        High,   // leading 0x7F marker
        Data,
        Trailer, // trailing 0x7F marker
        Done,
    }

    let mut state = State::Start;
    let mut marker_width: u32 = 0;
    let mut runs: Vec<Run> = Vec::new();

    for x in 0..capture.width.min(SCAN_COLS) {
        let val = cell_value(capture, x, y);

        match state {
            State::Start => {
                if val == MARK_LOW {
                    state = State::Low;
                    marker_width = 1;
                }
            }
            State::Low => {
                if val == MARK_LOW {
                    marker_width += 1;
                } else if val == MARK_HIGH {
                    state = State::High;
                    marker_width += 1;
                } else {
                    state = State::Start;
                }
            }
            State::High => {
                if val == MARK_HIGH {
                    marker_width += 1;
                } else {
                    state = State::Data;
                    runs.push(Run { c: val, n: 1 });
                }
            }
            State::Data => {
                if val == MARK_HIGH {
                    state = State::Trailer;
                } else if let Some(last) = runs.last_mut() {
                    if last.c == val {
                        last.n += 1;
                    } else {
                        runs.push(Run { c: val, n: 1 });
                    }
                }
            }
            State::Trailer => {
                if val == MARK_LOW {
                    state = State::Done;
                    break;
                }
            }
            State::Done => break,
        }
    }

    if state != State::Done || runs.is_empty() || marker_width == 0 {
        return None;
    }

    // marker_width spans two cells
    let mut text = String::new();
    for run in &runs {
        let count = ((run.n as f64 * 2.0) / marker_width as f64).round() as u32;
        let ch = run.c as char;
        if ch.is_ascii_graphic() || ch == ' ' {
            for _ in 0..count.max(1) {
                text.push(ch);
            }
        }
    }

    if text.is_empty() { None } else { Some(text) }
}

/// Paint `text` as a strip starting at the top-left corner, `cell` pixels per
/// character and `rows` pixels tall. Non-ASCII characters become '?'.
pub fn paint_strip(capture: &mut Capture, text: &str, cell: u32, rows: u32) {
    let cell = cell.max(1);
    let mut values = vec![MARK_LOW, MARK_HIGH];
    values.extend(text.chars().map(|c| {
        let v = if c.is_ascii() { c as u8 } else { b'?' };
        if v == MARK_HIGH { b'?' } else { v }
    }));
    values.extend([MARK_HIGH, MARK_LOW]);

    for y in 0..rows.min(capture.height) {
        for (i, v) in values.iter().enumerate() {
            let px = value_pixel(*v);
            for dx in 0..cell {
                capture.set_pixel(i as u32 * cell + dx, y, px);
            }
        }
    }
}

/// Text reader backed by [`decode_strip`]. A decoded strip is exact, so hits
/// carry full confidence.
#[derive(Debug, Default)]
pub struct StripReader;

impl TextReader for StripReader {
    fn read(&mut self, frame: &Capture) -> Result<Vec<TextHit>> {
        Ok(decode_strip(frame)
            .map(|text| vec![TextHit::new(text, 1.0)])
            .unwrap_or_default())
    }
}
