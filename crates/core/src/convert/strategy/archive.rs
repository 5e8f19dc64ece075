use std::collections::HashMap;
use std::sync::Arc;

use super::{chain, descriptor_for, tool, RouteTable};
use crate::convert::backend::{Backend, BackendChain};
use crate::convert::config::ToolsConfig;
use crate::convert::native::{ArchiveOp, NativeArchiveBackend};
use crate::convert::path::ExecutionPath;
use crate::convert::tools::Tool;
use crate::format::{Category, ConverterDescriptor};

/// Archive re-packing: extract with the input's chain, pack with the
/// target's chain.
pub struct CompressedConverter {
    pub(super) descriptor: ConverterDescriptor,
    pub(super) overrides: RouteTable,
    extractors: HashMap<&'static str, BackendChain>,
    packers: HashMap<&'static str, BackendChain>,
}

fn native(op: Option<ArchiveOp>) -> Vec<Arc<dyn Backend>> {
    op.map(|op| Arc::new(NativeArchiveBackend::new(op)) as Arc<dyn Backend>)
        .into_iter()
        .collect()
}

impl CompressedConverter {
    pub fn new(tools: &ToolsConfig) -> Self {
        let seven_zip = || tool(Tool::SevenZip, tools);
        let tar = || tool(Tool::Tar, tools);
        let with_native = |format: &str, fallback: Arc<dyn Backend>| {
            let mut backends = native(ArchiveOp::extract(format));
            backends.push(fallback);
            chain(backends)
        };
        let pack_with_native = |format: &str, fallback: Arc<dyn Backend>| {
            let mut backends = native(ArchiveOp::pack(format));
            backends.push(fallback);
            chain(backends)
        };

        let extractors = HashMap::from([
            ("zip", with_native("zip", seven_zip())),
            ("tar", with_native("tar", tar())),
            ("gz", with_native("gz", tar())),
            ("bz2", chain(vec![tar(), seven_zip()])),
            ("xz", chain(vec![tar(), seven_zip()])),
            ("7z", chain(vec![seven_zip()])),
            ("rar", chain(vec![tool(Tool::Unrar, tools), seven_zip()])),
        ]);

        let packers = HashMap::from([
            ("zip", pack_with_native("zip", seven_zip())),
            ("tar", pack_with_native("tar", tar())),
            ("gz", pack_with_native("gz", tar())),
            ("bz2", chain(vec![tar()])),
            ("xz", chain(vec![tar()])),
            ("7z", chain(vec![seven_zip()])),
        ]);

        Self {
            descriptor: descriptor_for(Category::Compressed),
            overrides: RouteTable::default(),
            extractors,
            packers,
        }
    }

    pub(super) fn route(&self, from: &str, to: &str) -> Option<ExecutionPath> {
        if let Some(path) = self.overrides.lookup(from, to) {
            return Some(path.clone());
        }

        Some(ExecutionPath::Repack {
            extract: self.extractors.get(from)?.clone(),
            pack: self.packers.get(to)?.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> CompressedConverter {
        CompressedConverter::new(&ToolsConfig::default())
    }

    #[test]
    fn test_repack_uses_both_formats() {
        assert_eq!(
            converter().route("zip", "tar").unwrap().describe(),
            "repack extract[native-zip, 7z] pack[native-tar, tar]"
        );
        assert_eq!(
            converter().route("rar", "7z").unwrap().describe(),
            "repack extract[unrar, 7z] pack[7z]"
        );
        assert_eq!(
            converter().route("gz", "xz").unwrap().describe(),
            "repack extract[native-tar-gz, tar] pack[tar]"
        );
    }

    #[test]
    fn test_every_pair_is_routed() {
        let converter = converter();
        for from in &converter.descriptor.supported_input_formats {
            for to in &converter.descriptor.supported_output_formats {
                assert!(converter.route(from, to).is_some(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_rar_cannot_be_produced() {
        assert!(converter().route("zip", "rar").is_none());
    }
}
