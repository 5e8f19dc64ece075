use super::{chain, descriptor_for, native_text, tool, RouteTable};
use crate::convert::backend::BackendChain;
use crate::convert::config::ToolsConfig;
use crate::convert::native::TextTransform;
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

/// Office documents and PDF.
pub struct DocumentConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) routes: RouteTable,
}

impl DocumentConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        let mut routes = RouteTable::default();
        let pandoc = || tool(Tool::Pandoc, tools);
        let libreoffice = || tool(Tool::LibreOffice, tools);

        routes.insert_pair(
            "pdf",
            "txt",
            ExecutionPath::direct(vec![tool(Tool::Pdftotext, tools), libreoffice()]),
        );
        routes.insert_pair(
            "pdf",
            "html",
            ExecutionPath::direct(vec![tool(Tool::Pdftohtml, tools), libreoffice()]),
        );
        routes.insert_pair("pdf", "docx", ExecutionPath::direct(vec![libreoffice()]));
        routes.insert_pair(
            "pdf",
            "md",
            ExecutionPath::chained(
                "txt",
                chain(vec![tool(Tool::Pdftotext, tools), libreoffice()]),
                BackendChain::single(native_text(TextTransform::TxtToMarkdown)),
            ),
        );

        for office in ["docx", "doc", "odt", "rtf"] {
            routes.insert_pair(
                office,
                "pdf",
                ExecutionPath::direct(vec![libreoffice(), pandoc()]),
            );
            if office != "docx" {
                routes.insert_pair(
                    office,
                    "docx",
                    ExecutionPath::direct(vec![libreoffice(), pandoc()]),
                );
            }
            for target in ["txt", "html", "md"] {
                routes.insert_pair(
                    office,
                    target,
                    ExecutionPath::direct(vec![pandoc(), libreoffice()]),
                );
            }
        }

        let txt_to_html = BackendChain::single(native_text(TextTransform::TxtToHtml));
        let md_to_html = chain(vec![pandoc(), native_text(TextTransform::MarkdownToHtml)]);
        let html_to_pdf = chain(vec![tool(Tool::Wkhtmltopdf, tools), libreoffice()]);
        let html_to_docx = chain(vec![pandoc(), libreoffice()]);

        routes.insert_pair("txt", "html", ExecutionPath::Direct(txt_to_html.clone()));
        routes.insert_pair(
            "txt",
            "md",
            ExecutionPath::direct(vec![native_text(TextTransform::TxtToMarkdown)]),
        );
        routes.insert_pair(
            "txt",
            "pdf",
            ExecutionPath::chained("html", txt_to_html, html_to_pdf.clone()),
        );
        routes.insert_pair(
            "txt",
            "docx",
            ExecutionPath::direct(vec![pandoc(), libreoffice()]),
        );

        routes.insert_pair("html", "pdf", ExecutionPath::Direct(html_to_pdf.clone()));
        routes.insert_pair("html", "docx", ExecutionPath::Direct(html_to_docx.clone()));
        routes.insert_pair(
            "html",
            "txt",
            ExecutionPath::direct(vec![native_text(TextTransform::HtmlToText)]),
        );
        routes.insert_pair(
            "html",
            "md",
            ExecutionPath::direct(vec![pandoc(), native_text(TextTransform::HtmlToMarkdown)]),
        );

        routes.insert_pair("md", "html", ExecutionPath::Direct(md_to_html.clone()));
        routes.insert_pair(
            "md",
            "txt",
            ExecutionPath::direct(vec![native_text(TextTransform::MarkdownToText), pandoc()]),
        );
        routes.insert_pair(
            "md",
            "pdf",
            ExecutionPath::chained("html", md_to_html.clone(), html_to_pdf),
        );
        routes.insert_pair(
            "md",
            "docx",
            ExecutionPath::chained("html", md_to_html, html_to_docx),
        );

        Self {
            descriptor: descriptor_for(Category::Document),
            routes,
        }
    }

    pub(super) fn route(&self, from: &str, to: &str) -> Option<ExecutionPath> {
        self.routes.lookup(from, to).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> DocumentConverter {
        DocumentConverter::new(&ToolsConfig::default())
    }

    #[test]
    fn test_pdf_routes() {
        let converter = converter();
        assert_eq!(
            converter.route("pdf", "txt").unwrap().describe(),
            "direct[pdftotext, libreoffice]"
        );
        assert_eq!(
            converter.route("pdf", "html").unwrap().describe(),
            "direct[pdftohtml, libreoffice]"
        );
        assert_eq!(
            converter.route("pdf", "docx").unwrap().describe(),
            "direct[libreoffice]"
        );
    }

    #[test]
    fn test_office_routes() {
        let converter = converter();
        for office in ["docx", "doc", "odt", "rtf"] {
            assert_eq!(
                converter.route(office, "pdf").unwrap().describe(),
                "direct[libreoffice, pandoc]"
            );
            assert_eq!(
                converter.route(office, "md").unwrap().describe(),
                "direct[pandoc, libreoffice]"
            );
        }
    }

    #[test]
    fn test_markdown_to_docx_is_chained() {
        match converter().route("md", "docx").unwrap() {
            ExecutionPath::Chained {
                intermediate,
                second,
                ..
            } => {
                assert_eq!(intermediate, "html");
                assert_eq!(second.names(), vec!["pandoc", "libreoffice"]);
            }
            other => panic!("unexpected plan: {}", other.describe()),
        }
    }

    #[test]
    fn test_legacy_office_formats_reach_docx() {
        let converter = converter();
        for office in ["doc", "odt", "rtf"] {
            assert_eq!(
                converter.route(office, "docx").unwrap().describe(),
                "direct[libreoffice, pandoc]"
            );
        }
    }

    #[test]
    fn test_pdf_to_markdown_goes_through_text() {
        match converter().route("pdf", "md").unwrap() {
            ExecutionPath::Chained {
                intermediate,
                first,
                second,
            } => {
                assert_eq!(intermediate, "txt");
                assert_eq!(first.names(), vec!["pdftotext", "libreoffice"]);
                assert_eq!(second.names(), vec!["native-txt-md"]);
            }
            other => panic!("unexpected plan: {}", other.describe()),
        }
    }

    #[test]
    fn test_every_advertised_pair_is_routed() {
        let converter = converter();
        for from in &converter.descriptor.supported_input_formats {
            for to in &converter.descriptor.supported_output_formats {
                if from != to {
                    assert!(converter.route(from, to).is_some(), "{from} -> {to}");
                }
            }
        }
    }
}
