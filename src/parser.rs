use crate::models::FileMap;

// Marker that introduces each generated file in the model's completion.
const MARKER: &str = "FILE:";

// Fence language tags the model is known to emit. Anything else is treated
// as content, matching the strict extraction contract.
const LANGUAGE_TAGS: [&str; 5] = ["javascript", "jsx", "js", "tsx", "ts"];

pub const PLACEHOLDER_PATH: &str = "App.js";

// Minimal runnable app, substituted when the completion yields no files at
// all so the downstream sandbox publish always has something to show.
const PLACEHOLDER_APP: &str = r#"
import React from 'react';
import { StyleSheet, Text, View } from 'react-native';

export default function App() {
  return (
    <View style={styles.container}>
      <Text>Hello World! Your app is running.</Text>
      <Text>We had trouble generating your specific app.</Text>
      <Text>Please try again with more details.</Text>
    </View>
  );
}

const styles = StyleSheet.create({
  container: {
    flex: 1,
    backgroundColor: '#fff',
    alignItems: 'center',
    justifyContent: 'center',
    padding: 20,
  },
});
"#;

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub explanation: String,
    pub files: FileMap,
}

/// Splits a free-form completion into a human-readable explanation and a
/// path -> content mapping. Never fails: a strict fenced-block pass is tried
/// first, then a lenient marker-to-marker pass, and finally a placeholder
/// file is synthesized so the result is always non-empty.
pub fn parse_response(text: &str) -> ParsedResponse {
    let explanation = text
        .split(MARKER)
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut files = strict_pass(text);

    if files.is_empty() {
        log::debug!("Strict extraction found no files, retrying with lenient pass");
        files = lenient_pass(text);
    }

    if files.is_empty() {
        log::warn!("Completion contained no extractable files, substituting placeholder app");
        files.insert(
            PLACEHOLDER_PATH.to_string(),
            PLACEHOLDER_APP.trim().to_string(),
        );
    }

    ParsedResponse { explanation, files }
}

/// Merges a freshly parsed mapping on top of the files from a previous
/// generation round. Returns the full merged set (drives the sandbox) and
/// the changed subset: keys that are new or whose content differs
/// byte-for-byte (drives the user-facing diff). The two are intentionally
/// distinct outputs.
pub fn merge_files(existing: &FileMap, parsed: &FileMap) -> (FileMap, FileMap) {
    let mut changed = FileMap::new();
    for (path, content) in parsed {
        if existing.get(path) != Some(content) {
            changed.insert(path.clone(), content.clone());
        }
    }

    let mut merged = existing.clone();
    merged.extend(parsed.iter().map(|(p, c)| (p.clone(), c.clone())));

    (merged, changed)
}

// Primary extraction: each marker's path is the rest of its line, the content
// is the body of the fenced code block that must start on the very next line.
// Malformed segments are skipped; scanning resumes past them. Repeated paths
// overwrite (last write wins).
fn strict_pass(text: &str) -> FileMap {
    let mut files = FileMap::new();
    let mut cursor = 0usize;

    while let Some(rel) = text[cursor..].find(MARKER) {
        let marker = cursor + rel;
        // Resume point if this segment turns out malformed.
        cursor = marker + MARKER.len();

        let Some(nl_rel) = text[cursor..].find('\n') else {
            break;
        };
        let path_end = cursor + nl_rel;
        let path = text[marker + MARKER.len()..path_end].trim();
        if path.is_empty() {
            continue;
        }

        let fence_start = path_end + 1;
        if !text[fence_start..].starts_with("```") {
            continue;
        }
        let tag_start = fence_start + 3;
        let Some(tag_nl_rel) = text[tag_start..].find('\n') else {
            continue;
        };
        let tag = text[tag_start..tag_start + tag_nl_rel].trim_end_matches('\r');
        if !tag.is_empty() && !LANGUAGE_TAGS.contains(&tag) {
            continue;
        }

        let content_start = tag_start + tag_nl_rel + 1;
        let Some(close_rel) = text[content_start..].find("```") else {
            continue;
        };
        let content = text[content_start..content_start + close_rel].trim();
        files.insert(path.to_string(), content.to_string());

        cursor = content_start + close_rel + 3;
    }

    files
}

// Fallback extraction for completions that dropped the fences: content runs
// from the line after the marker up to the next marker or end of input, with
// any leftover fence delimiters stripped out.
fn lenient_pass(text: &str) -> FileMap {
    let mut files = FileMap::new();
    let mut cursor = 0usize;

    while let Some(rel) = text[cursor..].find(MARKER) {
        let marker = cursor + rel;
        let after = marker + MARKER.len();

        let Some(nl_rel) = text[after..].find('\n') else {
            break;
        };
        let path = text[after..after + nl_rel].trim();
        let content_start = after + nl_rel + 1;

        let next_marker = text[content_start..]
            .find(MARKER)
            .map(|i| content_start + i)
            .unwrap_or(text.len());

        if !path.is_empty() {
            let content = strip_fences(&text[content_start..next_marker]);
            files.insert(path.to_string(), content.trim().to_string());
        }

        cursor = next_marker;
    }

    files
}

// Removes "```<tag>\n" sequences wholesale, then any bare "```" delimiters.
fn strip_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(i) = rest.find("```") {
        out.push_str(&rest[..i]);
        let after = &rest[i + 3..];

        let mut consumed = 0;
        for tag in LANGUAGE_TAGS {
            if let Some(tail) = after.strip_prefix(tag) {
                if tail.starts_with('\n') {
                    consumed = tag.len() + 1;
                }
                break;
            }
        }
        if consumed == 0 && after.starts_with('\n') {
            consumed = 1;
        }

        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_files_with_distinct_paths() {
        let text = "Here is your timer app.\n\n\
            FILE: App.js\n```js\nconsole.log('app');\n```\n\n\
            FILE: components/Timer.js\n```jsx\nexport const Timer = () => null;\n```\n";

        let parsed = parse_response(text);
        assert_eq!(parsed.explanation, "Here is your timer app.");
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files["App.js"], "console.log('app');");
        assert_eq!(
            parsed.files["components/Timer.js"],
            "export const Timer = () => null;"
        );
    }

    #[test]
    fn untagged_fences_are_accepted() {
        let text = "FILE: index.js\n```\nlet x = 1;\n```\n";
        let parsed = parse_response(text);
        assert_eq!(parsed.files["index.js"], "let x = 1;");
    }

    #[test]
    fn unknown_fence_tag_falls_through_to_lenient_pass() {
        let text = "FILE: data.json\n```json\n{\"a\": 1}\n```\n";
        let parsed = parse_response(text);
        // Strict pass rejects the tag. The lenient pass keeps unrecognized
        // tags as content and only strips the backtick delimiters.
        assert_eq!(parsed.files["data.json"], "json\n{\"a\": 1}");
    }

    #[test]
    fn duplicate_path_keeps_the_later_content() {
        let text = "FILE: App.js\n```\nfirst\n```\n\
            FILE: App.js\n```\nsecond\n```\n";
        let parsed = parse_response(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files["App.js"], "second");
    }

    #[test]
    fn no_markers_yields_full_explanation_and_placeholder() {
        let text = "  I could not produce any code for that request.  ";
        let parsed = parse_response(text);
        assert_eq!(
            parsed.explanation,
            "I could not produce any code for that request."
        );
        assert_eq!(parsed.files.len(), 1);
        assert!(parsed.files[PLACEHOLDER_PATH].contains("Hello World! Your app is running."));
    }

    #[test]
    fn lenient_pass_handles_missing_fences() {
        let text = "Some changes below.\n\
            FILE: a.js\nconst a = 1;\n\
            FILE: b.js\n```js\nconst b = 2;\n```\nextra\n";
        // Force the lenient path: a.js has no fence so the strict pass only
        // sees b.js; with one strict match the strict result wins.
        let parsed = parse_response(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files["b.js"], "const b = 2;");

        let fenceless = "FILE: a.js\nconst a = 1;\nFILE: b.js\nconst b = 2;\n";
        let parsed = parse_response(fenceless);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files["a.js"], "const a = 1;");
        assert_eq!(parsed.files["b.js"], "const b = 2;");
    }

    #[test]
    fn lenient_pass_strips_leftover_fence_delimiters() {
        let text = "FILE: a.js\n```js\nconst a = 1;\n```";
        let files = super::lenient_pass(text);
        assert_eq!(files["a.js"], "const a = 1;");
    }

    #[test]
    fn merge_overrides_and_reports_changes() {
        let existing: FileMap = [("A", "1"), ("B", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let parsed: FileMap = [("B", "3"), ("C", "4")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let (merged, changed) = merge_files(&existing, &parsed);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["A"], "1");
        assert_eq!(merged["B"], "3");
        assert_eq!(merged["C"], "4");

        assert_eq!(changed.len(), 2);
        assert_eq!(changed["B"], "3");
        assert_eq!(changed["C"], "4");
    }

    #[test]
    fn unchanged_files_are_not_reported_as_changed() {
        let existing: FileMap = [("A".to_string(), "same".to_string())].into_iter().collect();
        let parsed = existing.clone();
        let (merged, changed) = merge_files(&existing, &parsed);
        assert_eq!(merged, existing);
        assert!(changed.is_empty());
    }
}
