use async_trait::async_trait;
use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, TagEnd};
use quick_xml::escape::escape;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use regex_lite::{Captures, Regex};
use serde_json::{Map, Value};

use crate::convert::backend::{Backend, BackendJob, ExecContext};
use crate::convert::error::BackendError;

static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>").unwrap());
static BR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static BLOCK_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(p|div|h[1-6]|li|tr|ul|ol|blockquote|pre|table)>").unwrap());
static LI_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li[^>]*>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static HTML_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").unwrap());
static HTML_STRONG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)>").unwrap());
static HTML_EM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)>").unwrap());
static HTML_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\s[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap());
static HTML_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<code[^>]*>(.*?)</code>").unwrap());

/// Structured data formats, all decoded into one JSON value model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
    Yaml,
    Xml,
}

impl DataFormat {
    /// Maps a normalized format name.
    pub fn from_format(format: &str) -> Option<Self> {
        match format {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Xml => "xml",
        }
    }

    fn parse(&self, input: &str) -> Result<Value, String> {
        match self {
            Self::Csv => parse_csv(input),
            Self::Json => {
                serde_json::from_str(input).map_err(|e| format!("invalid JSON: {}", e))
            }
            Self::Yaml => {
                serde_yaml::from_str(input).map_err(|e| format!("invalid YAML: {}", e))
            }
            Self::Xml => parse_xml(input),
        }
    }

    fn render(&self, value: &Value) -> Result<String, String> {
        match self {
            Self::Csv => render_csv(value),
            Self::Json => pretty_json(value),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Self::Xml => Ok(render_xml(value)),
        }
    }
}

/// Prose formats: plain text, Markdown and HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProseFormat {
    Txt,
    Markdown,
    Html,
}

impl ProseFormat {
    /// Maps a normalized format name.
    pub fn from_format(format: &str) -> Option<Self> {
        match format {
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Markdown),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }

    fn to_plain(self, input: &str) -> String {
        match self {
            Self::Txt => input.to_string(),
            Self::Markdown => markdown_to_text(input),
            Self::Html => html_to_text(input),
        }
    }
}

/// A pure text-to-text conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTransform {
    TxtToHtml,
    TxtToMarkdown,
    MarkdownToHtml,
    MarkdownToText,
    HtmlToText,
    HtmlToMarkdown,
    /// Decodes one data format and encodes another.
    Data { from: DataFormat, to: DataFormat },
    /// Renders data for reading: a table when the data is tabular.
    DataToProse { from: DataFormat, to: ProseFormat },
    /// One `{"line": ...}` record per non-empty line of the plain text.
    ProseToData { from: ProseFormat, to: DataFormat },
}

impl TextTransform {
    /// Backend name, `native-<from>-<to>`.
    pub fn name(&self) -> String {
        let (from, to) = match self {
            Self::TxtToHtml => ("txt", "html"),
            Self::TxtToMarkdown => ("txt", "md"),
            Self::MarkdownToHtml => ("md", "html"),
            Self::MarkdownToText => ("md", "txt"),
            Self::HtmlToText => ("html", "txt"),
            Self::HtmlToMarkdown => ("html", "md"),
            Self::Data { from, to } => (from.extension(), to.extension()),
            Self::DataToProse { from, to } => (from.extension(), to.extension()),
            Self::ProseToData { from, to } => (from.extension(), to.extension()),
        };
        format!("native-{}-{}", from, to)
    }

    /// Applies the transform.
    pub fn apply(&self, input: &str) -> Result<String, String> {
        match self {
            Self::TxtToHtml => Ok(txt_to_html(input)),
            Self::TxtToMarkdown => Ok(input.to_string()),
            Self::MarkdownToHtml => Ok(markdown_to_html(input)),
            Self::MarkdownToText => Ok(markdown_to_text(input)),
            Self::HtmlToText => Ok(html_to_text(input)),
            Self::HtmlToMarkdown => Ok(html_to_markdown(input)),
            Self::Data { from, to } => to.render(&from.parse(input)?),
            Self::DataToProse { from, to } => data_to_prose(&from.parse(input)?, *to),
            Self::ProseToData { from, to } => to.render(&lines_as_records(&from.to_plain(input))),
        }
    }
}

/// Backend running a [`TextTransform`] on the worker pool.
pub struct NativeTextBackend {
    transform: TextTransform,
    name: String,
}

impl NativeTextBackend {
    pub fn new(transform: TextTransform) -> Self {
        Self {
            transform,
            name: transform.name(),
        }
    }
}

#[async_trait]
impl Backend for NativeTextBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, job: &BackendJob, ctx: &ExecContext) -> Result<(), BackendError> {
        let bytes = tokio::fs::read(&job.input).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let transform = self.transform;

        let converted = ctx
            .pool
            .run(move || transform.apply(&text).map_err(BackendError::failed))
            .await?;

        tokio::fs::write(&job.output, converted).await?;
        Ok(())
    }
}

fn html_document(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Document</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        body
    )
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn tidy_lines(text: &str) -> String {
    let trimmed: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = trimmed.join("\n");
    let collapsed = BLANK_RUNS.replace_all(&joined, "\n\n");
    let mut result = collapsed.trim().to_string();
    result.push('\n');
    result
}

fn pretty_json(value: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(value)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| e.to_string())
}

fn txt_to_html(input: &str) -> String {
    let mut body = String::new();
    for paragraph in input.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let lines: Vec<String> = paragraph
            .lines()
            .map(|line| escape(line).into_owned())
            .collect();
        body.push_str("<p>");
        body.push_str(&lines.join("<br>\n"));
        body.push_str("</p>\n");
    }
    html_document(&body)
}

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

fn markdown_to_html(input: &str) -> String {
    let mut body = String::new();
    pulldown_cmark::html::push_html(&mut body, Parser::new_ext(input, markdown_options()));
    html_document(&body)
}

fn markdown_to_text(input: &str) -> String {
    let mut text = String::new();
    for event in Parser::new_ext(input, markdown_options()) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock) => {
                text.push_str("\n\n")
            }
            Event::End(TagEnd::Item | TagEnd::TableHead | TagEnd::TableRow) => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push('\t'),
            Event::Rule => text.push_str("\n\n"),
            _ => {}
        }
    }
    tidy_lines(&text)
}

fn html_to_text(input: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(input, "");
    let text = BR_TAG.replace_all(&text, "\n");
    let text = LI_OPEN.replace_all(&text, "- ");
    let text = BLOCK_CLOSE.replace_all(&text, "\n\n");
    let text = ANY_TAG.replace_all(&text, "");
    let lines: Vec<String> = decode_entities(&text)
        .lines()
        .map(|l| l.trim().to_string())
        .collect();
    tidy_lines(&lines.join("\n"))
}

fn html_to_markdown(input: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(input, "");
    let text = HTML_HEADING.replace_all(&text, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n{} {}\n\n", "#".repeat(level), caps[2].trim())
    });
    let text = HTML_LINK.replace_all(&text, "[${2}](${1})");
    let text = HTML_STRONG.replace_all(&text, "**${1}**");
    let text = HTML_EM.replace_all(&text, "*${1}*");
    let text = HTML_CODE.replace_all(&text, "`${1}`");
    let text = BR_TAG.replace_all(&text, "\n");
    let text = LI_OPEN.replace_all(&text, "- ");
    let text = BLOCK_CLOSE.replace_all(&text, "\n\n");
    let text = ANY_TAG.replace_all(&text, "");
    let lines: Vec<String> = decode_entities(&text)
        .lines()
        .map(|l| l.trim().to_string())
        .collect();
    tidy_lines(&lines.join("\n"))
}

fn lines_as_records(text: &str) -> Value {
    let records = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut record = Map::new();
            record.insert("line".to_string(), Value::String(line.to_string()));
            Value::Object(record)
        })
        .collect();
    Value::Array(records)
}

/// Rows of data that reads as a table: an array of objects or one object,
/// possibly nested under single-key wrappers such as an XML root.
fn records(value: &Value) -> Option<Vec<&Map<String, Value>>> {
    match value {
        Value::Array(items) => items.iter().map(Value::as_object).collect(),
        Value::Object(object) => {
            if object.len() == 1 {
                let nested = object
                    .values()
                    .next()
                    .filter(|inner| inner.is_object() || inner.is_array())
                    .and_then(records);
                if nested.is_some() {
                    return nested;
                }
            }
            Some(vec![object])
        }
        _ => None,
    }
}

struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn from_value(value: &Value) -> Option<Self> {
        let records = records(value)?;
        let mut header: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !header.contains(key) {
                    header.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                header
                    .iter()
                    .map(|key| record.get(key).map(scalar_text).unwrap_or_default())
                    .collect()
            })
            .collect();
        Some(Self { header, rows })
    }
}

fn parse_csv(input: &str) -> Result<Value, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(input.as_bytes());
    let header = reader
        .headers()
        .map_err(|e| format!("invalid CSV: {}", e))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid CSV: {}", e))?;
        let mut object = Map::new();
        for (i, key) in header.iter().enumerate() {
            let value = record.get(i).unwrap_or_default();
            object.insert(key.to_string(), Value::String(value.to_string()));
        }
        rows.push(Value::Object(object));
    }
    Ok(Value::Array(rows))
}

fn render_csv(value: &Value) -> Result<String, String> {
    let table = Table::from_value(value)
        .ok_or_else(|| "data must be an object or an array of objects".to_string())?;
    if table.header.is_empty() {
        return Ok("\n".to_string());
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(&table.header)
        .map_err(|e| e.to_string())?;
    for row in &table.rows {
        writer.write_record(row).map_err(|e| e.to_string())?;
    }
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn markdown_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn data_to_prose(value: &Value, to: ProseFormat) -> Result<String, String> {
    let table = Table::from_value(value).filter(|t| !t.header.is_empty());
    match (to, table) {
        (ProseFormat::Txt, _) => pretty_json(value),
        (ProseFormat::Markdown, Some(table)) => {
            let mut out = format!(
                "| {} |\n|{}\n",
                table
                    .header
                    .iter()
                    .map(|h| markdown_cell(h))
                    .collect::<Vec<_>>()
                    .join(" | "),
                " --- |".repeat(table.header.len())
            );
            for row in &table.rows {
                let cells: Vec<String> = row.iter().map(|c| markdown_cell(c)).collect();
                out.push_str(&format!("| {} |\n", cells.join(" | ")));
            }
            Ok(out)
        }
        (ProseFormat::Markdown, None) => Ok(format!("```json\n{}```\n", pretty_json(value)?)),
        (ProseFormat::Html, Some(table)) => {
            let mut body = String::from("<table>\n<thead>\n<tr>");
            for heading in &table.header {
                body.push_str(&format!("<th>{}</th>", escape(heading.as_str())));
            }
            body.push_str("</tr>\n</thead>\n<tbody>\n");
            for row in &table.rows {
                body.push_str("<tr>");
                for cell in row {
                    body.push_str(&format!("<td>{}</td>", escape(cell.as_str())));
                }
                body.push_str("</tr>\n");
            }
            body.push_str("</tbody>\n</table>\n");
            Ok(html_document(&body))
        }
        (ProseFormat::Html, None) => Ok(html_document(&format!(
            "<pre>{}</pre>\n",
            escape(pretty_json(value)?.as_str())
        ))),
    }
}

#[derive(Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<(String, Value)>,
    text: String,
}

impl XmlNode {
    fn into_value(self) -> Value {
        let text = self.text.trim().to_string();
        if self.attributes.is_empty() && self.children.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
        }

        let mut object = Map::new();
        for (key, value) in self.attributes {
            object.insert(format!("@{}", key), Value::String(value));
        }
        for (name, value) in self.children {
            match object.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    object.insert(name, value);
                }
            }
        }
        if !text.is_empty() {
            object.insert("#text".to_string(), Value::String(text));
        }
        Value::Object(object)
    }
}

fn xml_node(element: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode, String> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| format!("invalid XML attribute: {}", e))?;
        let value = attribute
            .unescape_value()
            .map_err(|e| format!("invalid XML attribute: {}", e))?;
        node.attributes.push((
            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(node)
}

fn parse_xml(input: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<Map<String, Value>> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("invalid XML at {}: {}", reader.buffer_position(), e))?;
        let finished = match event {
            XmlEvent::Start(element) => {
                stack.push(xml_node(&element)?);
                None
            }
            XmlEvent::Empty(element) => Some(xml_node(&element)?),
            XmlEvent::End(_) => stack.pop(),
            XmlEvent::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| format!("invalid XML text: {}", e))?;
                    node.text.push_str(&unescaped);
                }
                None
            }
            XmlEvent::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
                None
            }
            XmlEvent::Eof => break,
            _ => None,
        };

        if let Some(node) = finished {
            let name = node.name.clone();
            let value = node.into_value();
            match stack.last_mut() {
                Some(parent) => parent.children.push((name, value)),
                None => {
                    let mut object = Map::new();
                    object.insert(name, value);
                    root = Some(object);
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err("invalid XML: unclosed element".to_string());
    }
    root.map(Value::Object)
        .ok_or_else(|| "invalid XML: no root element".to_string())
}

fn xml_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
        name.insert(0, '_');
    }
    name
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_element(out: &mut String, name: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(out, name, item, depth);
            }
        }
        Value::Object(object) => {
            let mut open = format!("{}<{}", indent, name);
            for (key, attr) in object.iter().filter(|(k, _)| k.starts_with('@')) {
                open.push_str(&format!(
                    " {}=\"{}\"",
                    xml_name(&key[1..]),
                    escape(scalar_text(attr).as_str())
                ));
            }

            let text = object.get("#text").map(scalar_text);
            let children: Vec<(&String, &Value)> = object
                .iter()
                .filter(|(k, _)| !k.starts_with('@') && k.as_str() != "#text")
                .collect();

            if children.is_empty() {
                match text {
                    Some(text) => out.push_str(&format!(
                        "{}>{}</{}>\n",
                        open,
                        escape(text.as_str()),
                        name
                    )),
                    None => out.push_str(&format!("{}/>\n", open)),
                }
                return;
            }

            out.push_str(&open);
            out.push_str(">\n");
            if let Some(text) = text {
                out.push_str(&format!("{}  {}\n", indent, escape(text.as_str())));
            }
            for (key, child) in children {
                write_element(out, &xml_name(key), child, depth + 1);
            }
            out.push_str(&format!("{}</{}>\n", indent, name));
        }
        scalar => {
            let text = scalar_text(scalar);
            if text.is_empty() {
                out.push_str(&format!("{}<{}/>\n", indent, name));
            } else {
                out.push_str(&format!(
                    "{}<{}>{}</{}>\n",
                    indent,
                    name,
                    escape(text.as_str()),
                    name
                ));
            }
        }
    }
}

fn render_xml(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    match value {
        // A single-key object whose value is an object is already rooted.
        Value::Object(object) if object.len() == 1 => match object.iter().next() {
            Some((key, inner)) if inner.is_object() => {
                write_element(&mut out, &xml_name(key), inner, 0)
            }
            _ => write_element(&mut out, "root", value, 0),
        },
        Value::Array(items) => {
            out.push_str("<root>\n");
            for item in items {
                write_element(&mut out, "item", item, 1);
            }
            out.push_str("</root>\n");
        }
        _ => write_element(&mut out, "root", value, 0),
    }

    out
}
