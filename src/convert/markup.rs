//! HTML builder with an open-tag stack

use blockkit::TextStyle;

/// Enabled style tags in nesting order, outermost first
fn style_tags(style: &TextStyle) -> impl Iterator<Item = &'static str> {
    [
        (style.bold, "strong"),
        (style.italic, "em"),
        (style.strike, "strike"),
        (style.code, "code"),
    ]
    .into_iter()
    .filter_map(|(enabled, tag)| enabled.then_some(tag))
}

/// Appends markup; every opened tag is closed in reverse order
#[derive(Debug, Default)]
pub struct Markup {
    out: String,
    open: Vec<&'static str>,
}

impl Markup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, tag: &'static str) -> &mut Self {
        self.open_with(tag, &[])
    }

    pub fn open_with(&mut self, tag: &'static str, attrs: &[(&str, &str)]) -> &mut Self {
        self.out.push('<');
        self.out.push_str(tag);
        self.push_attrs(attrs);
        self.out.push('>');
        self.open.push(tag);
        self
    }

    /// Close the most recently opened tag
    pub fn close(&mut self) -> &mut Self {
        if let Some(tag) = self.open.pop() {
            self.out.push_str("</");
            self.out.push_str(tag);
            self.out.push('>');
        }
        self
    }

    /// Self-closing element such as `<hr />`
    pub fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.out.push('<');
        self.out.push_str(tag);
        self.push_attrs(attrs);
        self.out.push_str(" />");
        self
    }

    /// Escaped text; newlines become `<br />`
    pub fn text(&mut self, text: &str) -> &mut Self {
        let mut lines = text.split('\n');
        if let Some(first) = lines.next() {
            escape_into(&mut self.out, first, false);
        }
        for line in lines {
            self.out.push_str("<br />");
            escape_into(&mut self.out, line, false);
        }
        self
    }

    /// Markup appended verbatim
    pub fn raw(&mut self, markup: &str) -> &mut Self {
        self.out.push_str(markup);
        self
    }

    /// Wrap whatever `inner` writes in `tag`
    pub fn element(&mut self, tag: &'static str, inner: impl FnOnce(&mut Self)) -> &mut Self {
        self.open(tag);
        inner(self);
        self.close()
    }

    /// Wrap whatever `inner` writes in the tags of `style`
    pub fn styled(&mut self, style: Option<&TextStyle>, inner: impl FnOnce(&mut Self)) -> &mut Self {
        let depth = self.open.len();
        if let Some(style) = style {
            for tag in style_tags(style) {
                self.open(tag);
            }
        }
        inner(self);
        while self.open.len() > depth {
            self.close();
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Close anything still open and return the markup
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.close();
        }
        self.out
    }

    fn push_attrs(&mut self, attrs: &[(&str, &str)]) {
        for (name, value) in attrs {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            escape_into(&mut self.out, value, true);
            self.out.push('"');
        }
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(bold: bool, italic: bool, strike: bool, code: bool) -> TextStyle {
        TextStyle {
            bold,
            italic,
            strike,
            code,
        }
    }

    #[test]
    fn test_style_nesting_order() {
        let mut m = Markup::new();
        m.styled(Some(&style(true, true, true, false)), |m| {
            m.text("x");
        });
        assert_eq!(m.finish(), "<strong><em><strike>x</strike></em></strong>");

        let mut m = Markup::new();
        m.styled(Some(&style(false, true, false, true)), |m| {
            m.text("y");
        });
        assert_eq!(m.finish(), "<em><code>y</code></em>");
    }

    #[test]
    fn test_plain_style_adds_nothing() {
        let mut m = Markup::new();
        m.styled(None, |m| {
            m.text("a");
        });
        m.styled(Some(&TextStyle::default()), |m| {
            m.text("b");
        });
        assert_eq!(m.finish(), "ab");
    }

    #[test]
    fn test_text_escaping_and_breaks() {
        let mut m = Markup::new();
        m.text("a < b & c\nnext");
        assert_eq!(m.finish(), "a &lt; b &amp; c<br />next");
    }

    #[test]
    fn test_attributes_are_escaped() {
        let mut m = Markup::new();
        m.open_with("a", &[("href", "https://x.test/?q=\"1\"&r=2")]).text("go");
        assert_eq!(
            m.finish(),
            "<a href=\"https://x.test/?q=&quot;1&quot;&amp;r=2\">go</a>"
        );
    }

    #[test]
    fn test_finish_closes_open_tags() {
        let mut m = Markup::new();
        m.open("ul").open("li").text("item");
        assert_eq!(m.finish(), "<ul><li>item</li></ul>");
    }

    #[test]
    fn test_empty_element() {
        let mut m = Markup::new();
        m.empty("img", &[("src", "u"), ("alt", "a")]).empty("hr", &[]);
        assert_eq!(m.finish(), "<img src=\"u\" alt=\"a\" /><hr />");
    }
}
