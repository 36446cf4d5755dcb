pub mod conversations;
pub mod id_prefixes;
pub mod responses;

pub use conversations::service::InMemoryConversationService;
pub use responses::service::ResponseServiceImpl as ResponseService;
pub use responses::store::InMemoryResponseRepository;
