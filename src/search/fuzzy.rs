use serde::{Deserialize, Serialize};

/// Tuning for the approximate matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Highest accepted score; 0 is a perfect match, 1 matches anything.
    pub threshold: f64,
    /// Character position a match is expected to start at.
    pub location: usize,
    /// How far from `location` a match may drift before it scores 1.0.
    pub distance: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            location: 0,
            distance: 100,
        }
    }
}

/// Best accepted alignment of a pattern within one text.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    pub score: f64,
    pub errors: usize,
    /// Inclusive character spans in the matched text.
    pub indices: Vec<(usize, usize)>,
}

/// An approximate substring matcher for one lowercased pattern.
///
/// Every alignment of the pattern against a substring of the text is costed
/// by edit distance; the substring may start anywhere. An alignment scores
/// `errors / pattern_len + |start - location| / distance` and the lowest
/// score at or under the threshold wins.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: Vec<char>,
    options: MatchOptions,
}

impl Matcher {
    pub fn new(pattern: &str, options: MatchOptions) -> Self {
        Self {
            pattern: pattern.chars().map(fold).collect(),
            options,
        }
    }

    pub fn pattern_len(&self) -> usize {
        self.pattern.len()
    }

    fn max_errors(&self) -> usize {
        (self.options.threshold * self.pattern.len() as f64).floor() as usize
    }

    /// Characters of text worth scanning; past this point even an exact
    /// match is farther from `location` than the threshold allows.
    fn window(&self) -> usize {
        let reach = (self.options.threshold.max(0.0) * self.options.distance as f64).floor() as usize;
        self.options.location + reach + self.pattern.len() + self.max_errors()
    }

    fn score(&self, errors: usize, start: usize) -> f64 {
        let accuracy = errors as f64 / self.pattern.len() as f64;
        let proximity = start.abs_diff(self.options.location);
        if self.options.distance == 0 {
            return if proximity > 0 { 1.0 } else { accuracy };
        }
        accuracy + proximity as f64 / self.options.distance as f64
    }

    /// Finds the best match of the pattern in `text`, if any is acceptable.
    pub fn find(&self, text: &str) -> Option<FuzzyMatch> {
        let text: Vec<char> = text.chars().take(self.window()).map(fold).collect();
        self.find_folded(&text)
    }

    /// Same as [`find`](Self::find) for text already passed through [`fold`].
    pub fn find_folded(&self, text: &[char]) -> Option<FuzzyMatch> {
        let m = self.pattern.len();
        if m == 0 || self.options.threshold < 0.0 {
            return None;
        }

        let max_errors = self.max_errors();
        let text = &text[..text.len().min(self.window())];
        let n = text.len();
        if n == 0 {
            return None;
        }

        // (errors, start) for the best alignment of pattern[..i] ending at text[..j]
        let mut prev: Vec<(usize, usize)> = (0..=n).map(|j| (0, j)).collect();
        let mut cur: Vec<(usize, usize)> = vec![(0, 0); n + 1];

        for i in 1..=m {
            cur[0] = (i, 0);
            let mut row_min = i;
            for j in 1..=n {
                let cost = usize::from(self.pattern[i - 1] != text[j - 1]);
                let substitute = (prev[j - 1].0 + cost, prev[j - 1].1);
                let skip_pattern = (prev[j].0 + 1, prev[j].1);
                let skip_text = (cur[j - 1].0 + 1, cur[j - 1].1);
                cur[j] = substitute.min(skip_pattern).min(skip_text);
                row_min = row_min.min(cur[j].0);
            }
            if row_min > max_errors {
                return None;
            }
            std::mem::swap(&mut prev, &mut cur);
        }

        let mut best: Option<FuzzyMatch> = None;
        for (end, &(errors, start)) in prev.iter().enumerate().skip(1) {
            if errors >= m || errors > max_errors || end <= start {
                continue;
            }
            let score = self.score(errors, start);
            if score > self.options.threshold {
                continue;
            }
            if best.as_ref().is_none_or(|b| score < b.score) {
                best = Some(FuzzyMatch {
                    score,
                    errors,
                    indices: vec![(start, end - 1)],
                });
            }
        }

        best
    }
}

/// Case folding applied to patterns and indexed text alike. Maps one char to
/// one char so match positions stay char offsets into the original text.
pub fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(pattern: &str) -> Matcher {
        Matcher::new(pattern, MatchOptions::default())
    }

    #[test]
    fn exact_prefix_scores_zero() {
        let m = matcher("meeting").find("Meeting notes").unwrap();
        assert_eq!(m.score, 0.0);
        assert_eq!(m.indices, vec![(0, 6)]);
    }

    #[test]
    fn tolerates_a_transposition() {
        let m = matcher("meetnig").find("meeting notes").unwrap();
        assert_eq!(m.errors, 2);
        assert!(m.score <= 0.3);
    }

    #[test]
    fn unrelated_text_is_rejected() {
        assert!(matcher("xyz123").find("Grocery list").is_none());
        assert!(matcher("meeting").find("Grocery list").is_none());
    }

    #[test]
    fn matches_far_from_the_start_are_rejected() {
        let text = format!("{}meeting", "a ".repeat(40));
        assert!(matcher("meeting").find(&text).is_none());
    }

    #[test]
    fn nearby_matches_pay_a_proximity_cost() {
        let m = matcher("list").find("grocery list").unwrap();
        assert_eq!(m.errors, 0);
        assert_eq!(m.indices, vec![(8, 11)]);
        assert!((m.score - 0.08).abs() < 1e-9);
    }

    #[test]
    fn zero_distance_only_accepts_the_exact_location() {
        let options = MatchOptions {
            distance: 0,
            ..MatchOptions::default()
        };
        assert!(Matcher::new("list", options).find("grocery list").is_none());
        assert!(Matcher::new("groc", options).find("grocery list").is_some());
    }

    #[test]
    fn prefolded_text_matches_like_raw_text() {
        let m = matcher("grocery");
        let raw = "Weekly GROCERY run";
        let folded: Vec<char> = raw.chars().map(fold).collect();
        assert_eq!(m.find_folded(&folded), m.find(raw));
        assert_eq!(m.find_folded(&folded).unwrap().indices, vec![(7, 13)]);
    }
}
