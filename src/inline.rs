use crate::markup::{escape_text, start_tag, tag_name};
use kuchiki::{NodeData, NodeRef};

/// Inline elements that are re-opened on both sides of a word split.
const WRAPPER_TAGS: &[&str] = &[
    "a", "abbr", "b", "cite", "code", "del", "em", "font", "i", "ins", "kbd", "mark", "q", "s",
    "small", "span", "strong", "time", "u", "var",
];

#[derive(Debug, Clone)]
struct Shell {
    open: String,
    name: String,
}

#[derive(Debug, Clone)]
enum Piece {
    Text(String),
    Space,
    /// Serialized element that is never cut (images, superscripts, footnote references).
    Atom(String),
}

#[derive(Debug, Clone)]
struct Run {
    wrappers: Vec<usize>,
    piece: Piece,
}

/// Word-addressable view of a block element's inline content. Splitting keeps
/// inline formatting on both halves and never cuts inside an atomic element.
#[derive(Debug, Clone)]
pub(crate) struct InlineText {
    shells: Vec<Shell>,
    runs: Vec<Run>,
    word_starts: Vec<usize>,
}

impl InlineText {
    pub(crate) fn from_element(node: &NodeRef) -> Self {
        let mut text = InlineText {
            shells: Vec::new(),
            runs: Vec::new(),
            word_starts: Vec::new(),
        };
        let mut stack = Vec::new();
        for child in node.children() {
            text.collect(&child, &mut stack);
        }
        text.index_words();
        text
    }

    fn collect(&mut self, node: &NodeRef, stack: &mut Vec<usize>) {
        match node.data() {
            NodeData::Text(value) => {
                let value = value.borrow();
                let mut word = String::new();
                for ch in value.chars() {
                    if ch.is_whitespace() && ch != '\u{a0}' {
                        if !word.is_empty() {
                            self.push(stack, Piece::Text(std::mem::take(&mut word)));
                        }
                        if !matches!(self.runs.last(), Some(Run { piece: Piece::Space, .. })) {
                            self.push(stack, Piece::Space);
                        }
                    } else {
                        word.push(ch);
                    }
                }
                if !word.is_empty() {
                    self.push(stack, Piece::Text(word));
                }
            }
            NodeData::Element(_) => {
                let name = tag_name(node).unwrap_or_default();
                if is_wrapper(node, &name) {
                    let open = start_tag(node).unwrap_or_default();
                    self.shells.push(Shell { open, name });
                    stack.push(self.shells.len() - 1);
                    for child in node.children() {
                        self.collect(&child, stack);
                    }
                    stack.pop();
                } else if name == "br" {
                    if !matches!(self.runs.last(), Some(Run { piece: Piece::Space, .. })) {
                        self.push(stack, Piece::Space);
                    }
                } else {
                    self.push(stack, Piece::Atom(node.to_string()));
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, stack: &[usize], piece: Piece) {
        self.runs.push(Run {
            wrappers: stack.to_vec(),
            piece,
        });
    }

    fn index_words(&mut self) {
        let mut previous_was_space = true;
        for (idx, run) in self.runs.iter().enumerate() {
            let is_space = matches!(run.piece, Piece::Space);
            if !is_space && previous_was_space {
                self.word_starts.push(idx);
            }
            previous_was_space = is_space;
        }
    }

    pub(crate) fn word_count(&self) -> usize {
        self.word_starts.len()
    }

    /// Markup of the first `words` words and of everything after them.
    pub(crate) fn split_at_word(&self, words: usize) -> (String, String) {
        if words >= self.word_count() {
            return (self.render(0, self.runs.len()), String::new());
        }
        if words == 0 {
            return (String::new(), self.render(0, self.runs.len()));
        }
        let cut = self.word_starts[words];
        (self.render(0, cut), self.render(cut, self.runs.len()))
    }

    fn render(&self, start: usize, end: usize) -> String {
        let mut start = start;
        let mut end = end.min(self.runs.len());
        while start < end && matches!(self.runs[start].piece, Piece::Space) {
            start += 1;
        }
        while end > start && matches!(self.runs[end - 1].piece, Piece::Space) {
            end -= 1;
        }

        let mut out = String::new();
        let mut open: Vec<usize> = Vec::new();
        for run in &self.runs[start..end] {
            let common = open
                .iter()
                .zip(run.wrappers.iter())
                .take_while(|(a, b)| a == b)
                .count();
            while open.len() > common {
                if let Some(id) = open.pop() {
                    close_shell(&self.shells[id], &mut out);
                }
            }
            for id in &run.wrappers[common..] {
                out.push_str(&self.shells[*id].open);
                open.push(*id);
            }
            match &run.piece {
                Piece::Text(text) => out.push_str(&escape_text(text)),
                Piece::Space => out.push(' '),
                Piece::Atom(html) => out.push_str(html),
            }
        }
        while let Some(id) = open.pop() {
            close_shell(&self.shells[id], &mut out);
        }
        out
    }
}

fn close_shell(shell: &Shell, out: &mut String) {
    out.push_str("</");
    out.push_str(&shell.name);
    out.push('>');
}

fn is_wrapper(node: &NodeRef, name: &str) -> bool {
    if !WRAPPER_TAGS.contains(&name) {
        return false;
    }
    let Some(element) = node.as_element() else {
        return false;
    };
    let attrs = element.attributes.borrow();
    // Footnote references travel as one unit.
    if attrs.get("data-footnote-ref").is_some() {
        return false;
    }
    !attrs
        .get("class")
        .is_some_and(|class| class.split_whitespace().any(|c| c == "footnote-reference"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{parse_fragment, select_first};

    fn inline_of(html: &str) -> InlineText {
        let doc = parse_fragment(html);
        let p = select_first(&doc, "p").expect("paragraph");
        InlineText::from_element(&p)
    }

    #[test]
    fn counts_words_across_wrappers() {
        let text = inline_of("<p>one <em>two three</em> four</p>");
        assert_eq!(text.word_count(), 4);
    }

    #[test]
    fn split_reopens_wrappers_on_both_sides() {
        let text = inline_of("<p>one <em>two three</em> four</p>");
        let (head, tail) = text.split_at_word(2);
        assert_eq!(head, "one <em>two</em>");
        assert_eq!(tail, "<em>three</em> four");
    }

    #[test]
    fn footnote_reference_stays_glued_to_its_word() {
        let text = inline_of(
            "<p>alpha beta<span class=\"footnote-reference\" data-footnote-ref=\"1\">1</span> gamma</p>",
        );
        assert_eq!(text.word_count(), 3);
        let (head, tail) = text.split_at_word(2);
        assert!(head.ends_with("data-footnote-ref=\"1\">1</span>"), "head was {head}");
        assert_eq!(tail, "gamma");
    }

    #[test]
    fn split_past_end_keeps_everything() {
        let text = inline_of("<p>a &amp; b</p>");
        let (head, tail) = text.split_at_word(10);
        assert_eq!(head, "a &amp; b");
        assert!(tail.is_empty());
    }
}
