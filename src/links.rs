/// Extracts wikilink targets from a document body, in order of appearance.
///
/// Recognizes `[[Target]]`, `[[Target|Alias]]` and embeds (`![[Target]]`).
/// Heading and block suffixes are dropped so the result names a document.
/// Duplicates are kept; malformed or unterminated brackets are ignored, as are
/// lines inside fenced code blocks.
pub fn extract_links(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fenced = false;

    for line in body.lines() {
        if is_fence(line) {
            in_fenced = !in_fenced;
            continue;
        }
        if in_fenced {
            continue;
        }
        extract_wikilinks_from_line(line, &mut out);
    }

    out
}

fn extract_wikilinks_from_line(line: &str, out: &mut Vec<String>) {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] != b'[' || bytes[i + 1] != b'[' {
            i += 1;
            continue;
        }

        let start = i + 2;
        let mut j = start;
        let mut close = None;
        while j + 1 < bytes.len() {
            // A second opener before any closer restarts the match there.
            if bytes[j] == b'[' && bytes[j + 1] == b'[' {
                break;
            }
            if bytes[j] == b']' && bytes[j + 1] == b']' {
                close = Some(j);
                break;
            }
            j += 1;
        }

        match close {
            Some(end) => {
                if let Some(target) = normalize_wikilink_target(&line[start..end]) {
                    out.push(target);
                }
                i = end + 2;
            }
            None => i = j.max(i + 1),
        }
    }
}

fn normalize_wikilink_target(raw: &str) -> Option<String> {
    let s = raw.trim();
    let before_alias = match s.split_once('|') {
        Some((left, _)) => left,
        None => s,
    };
    let target = before_alias
        .split(['#', '^'])
        .next()
        .unwrap_or_default()
        .trim();

    if target.is_empty() || target.contains(['[', ']']) {
        return None;
    }
    Some(target.to_string())
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}
