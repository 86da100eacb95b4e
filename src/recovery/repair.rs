use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Slices of every complete object or array element of the first JSON array
/// found in `raw`.
///
/// Scanning stops quietly at the first structural break, so a truncated
/// array yields the elements written before the cut.
pub fn complete_elements(raw: &str) -> Vec<&str> {
    let Some(open) = raw.find('[') else {
        return Vec::new();
    };

    let bytes = raw.as_bytes();
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut element_start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[open + 1..].iter().enumerate() {
        let pos = open + 1 + offset;

        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                if depth == 0 {
                    element_start = Some(pos);
                }
                depth += 1;
            }
            b'}' | b']' => {
                if depth == 0 {
                    // closing bracket of the outer array
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = element_start.take() {
                        elements.push(&raw[start..=pos]);
                    }
                }
            }
            _ => {}
        }
    }

    elements
}

/// Best-effort recovery of records from a damaged JSON array.
///
/// Complete elements that deserialize into `T` are kept as the JSON they were
/// stored as, so fields unknown to `T` survive a rewrite. Returns the kept
/// elements and how many complete elements were dropped.
pub fn salvage<T: DeserializeOwned>(raw: &str) -> (Vec<Value>, usize) {
    let mut discarded = 0;
    let kept = complete_elements(raw)
        .into_iter()
        .filter_map(|element| {
            let value = serde_json::from_str::<Value>(element)
                .ok()
                .filter(|value| <T as Deserialize>::deserialize(value).is_ok());
            if value.is_none() {
                discarded += 1;
            }
            value
        })
        .collect();

    (kept, discarded)
}
