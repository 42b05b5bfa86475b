use std::collections::BTreeMap;

/// Tallest bar drawn before the chart switches to a scaled vertical axis.
pub const MAX_HEIGHT: i32 = 25;

const UNDERSCORES: &str = "________________";
const SPACES: &str = "                ";

/// Decimal width of a positive integer; 0 for values <= 0.
fn width_of(mut x: i32) -> usize {
    let mut width = 0;
    while x > 0 {
        width += 1;
        x /= 10;
    }
    width
}

/// Counts identical samples into value-ordered buckets.
fn build_buckets(samples: &[i32]) -> BTreeMap<i32, i32> {
    let mut buckets = BTreeMap::new();
    for &x in samples {
        *buckets.entry(x).or_insert(0) += 1;
    }
    buckets
}

/// Appends an ASCII column chart of `samples` to `body`.
///
/// The chart is a count header row, `height` bar rows from tall to short
/// (a `[]` cell where the bucket reaches the row, underscores forming the
/// baseline on the bottom row), and a label row with the bucket values.
/// Column width adapts to the widest label and count; bars taller than
/// `max_height` are scaled down uniformly.
pub fn draw_histogram(body: &mut String, samples: &[i32], max_height: i32) {
    if samples.is_empty() {
        return;
    }
    let buckets = build_buckets(samples);
    let max_label = *buckets.keys().next_back().unwrap();
    let max_count = *buckets.values().max().unwrap();

    let mut height = max_count;
    let left_padding = width_of(max_count);
    let col_width = (width_of(max_label) + 1).max(3).max(left_padding + 2);
    let mut scaling_factor = 1;
    if height > max_height {
        scaling_factor = (height + max_height) / max_height;
        height /= scaling_factor;
    }

    body.push('\n');
    body.push_str(&format!("{:>width$}", " ", width = left_padding + 2));
    for count in buckets.values() {
        body.push_str(&format!("[{:>width$}]", count, width = col_width - 2));
    }
    body.push('\n');

    let mut row = height * scaling_factor;
    while row > 0 {
        body.push_str(&format!("{:>width$}|", row, width = left_padding));
        let pad_width = (col_width - 2).min(UNDERSCORES.len());
        let on_baseline = row == scaling_factor;
        for count in buckets.values() {
            body.push_str(if on_baseline {
                &UNDERSCORES[..pad_width]
            } else {
                &SPACES[..pad_width]
            });
            body.push_str(if *count < row {
                if on_baseline {
                    "__"
                } else {
                    "  "
                }
            } else {
                "[]"
            });
        }
        body.push('\n');
        row -= scaling_factor;
    }

    body.push_str(&format!("{:>width$}", " ", width = left_padding + 1));
    for label in buckets.keys() {
        body.push_str(&format!("{:>width$}", label, width = col_width));
    }
    body.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(samples: &[i32]) -> String {
        let mut body = String::new();
        draw_histogram(&mut body, samples, MAX_HEIGHT);
        body
    }

    #[test]
    fn test_empty_samples_draw_nothing() {
        assert_eq!(rendered(&[]), "");
    }

    #[test]
    fn test_two_bucket_chart() {
        // Deltas 3, 4, 3 -> buckets {3: 2, 4: 1}.
        let chart = rendered(&[3, 4, 3]);
        let lines: Vec<&str> = chart.split('\n').collect();
        // Leading newline, count header, two bar rows, label row, trailing
        // newline split artifact.
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "   [2][1]");
        assert_eq!(lines[2], "2| []   ");
        assert_eq!(lines[3], "1|_[]_[]");
        assert_eq!(lines[4], "    3  4");
    }

    #[test]
    fn test_tall_bars_are_scaled() {
        let samples = vec![7; 100];
        let chart = rendered(&samples);
        let bar_rows = chart
            .lines()
            .filter(|line| line.contains('|'))
            .count() as i32;
        assert!(bar_rows <= MAX_HEIGHT, "bar rows {} exceed max height", bar_rows);
        assert!(chart.contains("[100]"));
    }

    #[test]
    fn test_column_width_tracks_wide_labels() {
        let chart = rendered(&[12345, 12345, 7]);
        // Labels are right-aligned in columns wide enough for the largest;
        // counts pad to the same column width.
        assert!(chart.contains("12345"));
        assert!(chart.contains("[   1][   2]"));
    }
}
