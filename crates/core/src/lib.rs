pub mod cache;
pub mod config;
pub mod cost;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod response;

pub use cache::{Cache, CacheBackend, CacheError, Cached, InMemoryCache};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use cost::{ModelPricing, PriceTable, UsageTotals};
pub use domain::{
    CandidateTemplate, Inquiry, Property, PropertyId, Reservation, ReservationId,
    StructuredContext, TemplateCategory, TemplateId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{PipelineEvent, PipelineState, PipelineTracker};
pub use response::{GuardrailVerdict, ResponsePlan, ResponseTier, SelectionThresholds};
