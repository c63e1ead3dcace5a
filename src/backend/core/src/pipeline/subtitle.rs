//! WebVTT rendering.

use super::transcribe::Transcript;

/// Render transcript segments as a WEBVTT document.
///
/// A transcript without segments becomes a single cue spanning nothing,
/// so the file is still valid.
pub fn to_vtt(transcript: &Transcript) -> String {
    let mut out = String::from("WEBVTT\n\n");

    if transcript.segments.is_empty() {
        if !transcript.text.trim().is_empty() {
            out.push_str(&format_cue(1, 0.0, 0.0, &transcript.text));
        }
        return out;
    }

    for (i, segment) in transcript.segments.iter().enumerate() {
        out.push_str(&format_cue(i + 1, segment.start, segment.end, &segment.text));
    }
    out
}

fn format_cue(index: usize, start: f64, end: f64, text: &str) -> String {
    format!(
        "{}\n{} --> {}\n{}\n\n",
        index,
        format_timestamp(start),
        format_timestamp(end),
        text.trim()
    )
}

/// `HH:MM:SS.mmm`
fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}
