//! Pattern and param-lane parsing
//!
//! Pattern tokens: `X` = gate with accent velocity 127, `x` = gate with
//! velocity 64, `.` = rest. Anything else (spaces, bar separators) is
//! ignored, so `"X... x... X... x..."` reads naturally.

/// Parse a pattern string into parallel gate and velocity arrays
pub fn parse_pattern(pattern: &str) -> (Vec<bool>, Vec<u8>) {
    let mut gates = Vec::with_capacity(pattern.len());
    let mut velocities = Vec::with_capacity(pattern.len());

    for ch in pattern.chars() {
        match ch {
            'X' => {
                gates.push(true);
                velocities.push(127);
            }
            'x' => {
                gates.push(true);
                velocities.push(64);
            }
            '.' => {
                gates.push(false);
                velocities.push(0);
            }
            _ => {}
        }
    }

    (gates, velocities)
}

/// Parse a comma- or whitespace-separated float lane, truncated or padded
/// with zeros to exactly `steps` entries. Unparseable entries become 0.0.
pub fn parse_param_lane(values: &str, steps: usize) -> Vec<f64> {
    let parts: Vec<&str> = if values.contains(',') {
        values.split(',').collect()
    } else {
        values.split_whitespace().collect()
    };

    let mut lane: Vec<f64> = parts
        .iter()
        .map(|part| part.trim().parse().unwrap_or(0.0))
        .collect();

    lane.resize(steps, 0.0);
    lane
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_tokens() {
        let (gates, velocities) = parse_pattern("X.x.");
        assert_eq!(gates, vec![true, false, true, false]);
        assert_eq!(velocities, vec![127, 0, 64, 0]);
    }

    #[test]
    fn test_parse_pattern_ignores_noise() {
        let (gates, _) = parse_pattern("X... | x...");
        assert_eq!(gates.len(), 8);
    }

    #[test]
    fn test_param_lane_csv_and_spaces() {
        assert_eq!(parse_param_lane("1.0, 2.0, 3.0", 4), vec![1.0, 2.0, 3.0, 0.0]);
        assert_eq!(parse_param_lane("1 2 3 4 5", 3), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_param_lane_bad_entries_are_zero() {
        assert_eq!(parse_param_lane("1.0, oops, 3.0", 3), vec![1.0, 0.0, 3.0]);
        assert_eq!(parse_param_lane("", 2), vec![0.0, 0.0]);
    }
}
