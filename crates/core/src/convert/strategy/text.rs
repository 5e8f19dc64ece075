use super::{chain, descriptor_for, native_text, tool, RouteTable};
use crate::convert::backend::BackendChain;
use crate::convert::config::ToolsConfig;
use crate::convert::native::{DataFormat, ProseFormat, TextTransform};
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

const DATA_FORMATS: [DataFormat; 4] = [
    DataFormat::Csv,
    DataFormat::Json,
    DataFormat::Yaml,
    DataFormat::Xml,
];
const PROSE_FORMATS: [ProseFormat; 3] = [ProseFormat::Txt, ProseFormat::Markdown, ProseFormat::Html];

/// Plain text, markup and structured data formats.
pub struct TextConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) routes: RouteTable,
}

impl TextConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        let mut routes = RouteTable::default();
        let mut native = |transform: TextTransform, from: &str, to: &str| {
            routes.insert_pair(from, to, ExecutionPath::direct(vec![native_text(transform)]));
        };

        native(TextTransform::TxtToHtml, "txt", "html");
        native(TextTransform::TxtToMarkdown, "txt", "md");
        native(TextTransform::MarkdownToText, "md", "txt");
        native(TextTransform::HtmlToText, "html", "txt");

        for from in DATA_FORMATS {
            for to in DATA_FORMATS.into_iter().filter(|to| *to != from) {
                native(
                    TextTransform::Data { from, to },
                    from.extension(),
                    to.extension(),
                );
            }
            for to in PROSE_FORMATS {
                native(
                    TextTransform::DataToProse { from, to },
                    from.extension(),
                    to.extension(),
                );
                native(
                    TextTransform::ProseToData { from: to, to: from },
                    to.extension(),
                    from.extension(),
                );
            }
        }

        let md_to_html = chain(vec![
            tool(Tool::Pandoc, tools),
            native_text(TextTransform::MarkdownToHtml),
        ]);
        let html_to_pdf = chain(vec![
            tool(Tool::Wkhtmltopdf, tools),
            tool(Tool::Pandoc, tools),
            tool(Tool::LibreOffice, tools),
        ]);

        routes.insert_pair("md", "html", ExecutionPath::Direct(md_to_html.clone()));
        routes.insert_pair(
            "html",
            "md",
            ExecutionPath::direct(vec![
                tool(Tool::Pandoc, tools),
                native_text(TextTransform::HtmlToMarkdown),
            ]),
        );

        // Every other format reaches pdf through an html rendering.
        routes.insert_pair("html", "pdf", ExecutionPath::Direct(html_to_pdf.clone()));
        routes.insert_pair(
            "txt",
            "pdf",
            ExecutionPath::chained(
                "html",
                BackendChain::single(native_text(TextTransform::TxtToHtml)),
                html_to_pdf.clone(),
            ),
        );
        routes.insert_pair(
            "md",
            "pdf",
            ExecutionPath::chained("html", md_to_html, html_to_pdf.clone()),
        );
        for from in DATA_FORMATS {
            let to_html = TextTransform::DataToProse {
                from,
                to: ProseFormat::Html,
            };
            routes.insert_pair(
                from.extension(),
                "pdf",
                ExecutionPath::chained(
                    "html",
                    BackendChain::single(native_text(to_html)),
                    html_to_pdf.clone(),
                ),
            );
        }

        Self {
            descriptor: descriptor_for(Category::Text),
            routes,
        }
    }

    pub(super) fn route(&self, from: &str, to: &str) -> Option<ExecutionPath> {
        self.routes.lookup(from, to).cloned()
    }
}
