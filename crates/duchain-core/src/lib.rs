//! DUChain Core - Thread-safe semantic index of a code base
//!
//! This crate provides the definition-use chain of a language front-end:
//! - Scoped contexts per document, linked by ownership and imports
//! - Declarations with identity that survives re-parses, uses, definitions
//! - Name lookup through scopes and import closures, template instantiation
//! - A registry of document chains keyed by parsing environment
//! - A reentrant reader/writer lock protocol and change notifications

// Foundation
pub mod arena;
pub mod identifier;
pub mod interner;
pub mod range;
pub mod set_repository;

// Graph
pub mod context;
pub mod declaration;
pub mod declaration_id;
pub mod indexed;
pub mod instantiation;
pub mod symbol_table;
pub mod top_context;
pub mod types;

// Chain
pub mod builder;
pub mod chain;
pub mod dump;
pub mod environment;
pub mod error;
pub mod lock;
pub mod observer;
pub mod visibility;

// Chain re-exports
pub use chain::{ChainOptions, DUChain, ImportCacheMetrics};
pub use error::{DUChainError, Result};
pub use lock::{DUChainLock, DUChainReadLocker, DUChainWriteLocker};

// Graph re-exports
pub use context::{ContextType, DUContext, Import, Use};
pub use declaration::{
    AccessPolicy, ClassMemberFacet, Declaration, DeclarationFacets, DeclarationFlags,
    DeclarationKind, FunctionFacet, TemplateFacet, TemplateParameterFacet,
};
pub use declaration_id::{DeclarationId, PersistentDeclarationId};
pub use indexed::{IndexedContext, IndexedDeclaration, IndexedTopContext};
pub use instantiation::{IndexedInstantiationInformation, InstantiationInformation};
pub use top_context::{TopContextState, TopDUContext};
pub use types::{AbstractType, IdentifiedType, IndexedType, IntegralKind, TypeModifiers};

// Identifier re-exports
pub use identifier::{
    Identifier, IdentifierRepository, IndexedIdentifier, IndexedQualifiedIdentifier,
    QualifiedIdentifier, TypeIdentifier,
};
pub use interner::IndexedString;
pub use range::{SimpleCursor, SimpleRange};
pub use set_repository::{Set, SetRepository, MAX_INDEX};

// Environment re-exports
pub use environment::{
    EnvironmentType, IdentifiedFile, MacroEnvironment, MacroEnvironmentFile, ParsingEnvironment,
    ParsingEnvironmentFile, ParsingEnvironmentManager, StandardEnvironmentManager,
    MACRO_ENVIRONMENT,
};

// Observer re-exports
pub use observer::{
    ChangeEvent, ChangeReceiver, ChangeSubject, Modification, ObserverBus, ObserverId,
    Relationship,
};
pub use visibility::{ClassMembersVisible, DeclaredBeforeUse, VisibilityMode, VisibilityPolicy};

// Builder re-exports
pub use builder::{
    load_events, parse_events, replay, replay_document, split_documents, BuildError, BuildEvent,
    BuildStats, ChainBuilder, DocumentScript, ReplayOptions, ReplaySummary, ReplayedDocument,
};
pub use dump::{dump_chain, dump_dot_graph};
