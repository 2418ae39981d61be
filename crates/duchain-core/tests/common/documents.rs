//! Small documents built directly through a `ChainBuilder`.

use duchain_core::{
    AbstractType, ChainBuilder, DUChain, DUChainWriteLocker, DeclarationKind, IdentifiedFile,
    Identifier, IndexedContext, IndexedDeclaration, IndexedTopContext, SimpleCursor, SimpleRange,
};

/// Whole-line range `[line:0, line:10)`.
pub fn line(line: i32) -> SimpleRange {
    SimpleRange::from_coordinates(line, 0, line, 10)
}

/// Range on a single line.
pub fn span(line: i32, start: i32, end: i32) -> SimpleRange {
    SimpleRange::from_coordinates(line, start, line, end)
}

pub fn at(line: i32, column: i32) -> SimpleCursor {
    SimpleCursor::new(line, column)
}

/// Run `f` while holding the write lock of `chain`.
pub fn write_locked<R>(chain: &DUChain, f: impl FnOnce() -> R) -> R {
    let _write = DUChainWriteLocker::new(chain.lock());
    f()
}

/// Build and register `url`, letting `f` populate it.
///
/// The caller must hold the write lock.
pub fn build_document(
    chain: &DUChain,
    url: &str,
    f: impl FnOnce(&mut ChainBuilder<'_>),
) -> IndexedTopContext {
    let mut builder = ChainBuilder::begin(chain, IdentifiedFile::from(url), line_span(0, 100))
        .expect("builder should start under the write lock");
    f(&mut builder);
    builder.finish().expect("document should register")
}

fn line_span(first: i32, last: i32) -> SimpleRange {
    SimpleRange::from_coordinates(first, 0, last, 0)
}

/// A registered document holding `int i;` on line 1.
pub struct DocumentFixture {
    pub top: IndexedTopContext,
    pub root: IndexedContext,
    pub declaration: IndexedDeclaration,
}

impl DocumentFixture {
    pub fn int_i(chain: &DUChain, url: &str) -> Self {
        let mut declaration = None;
        let top = build_document(chain, url, |builder| {
            declaration = Some(
                builder
                    .declare(
                        Identifier::new("i"),
                        span(1, 4, 5),
                        DeclarationKind::Instance,
                        AbstractType::builtin("int"),
                    )
                    .unwrap(),
            );
        });
        Self {
            top,
            root: chain.root_context(top).unwrap(),
            declaration: declaration.unwrap(),
        }
    }
}
