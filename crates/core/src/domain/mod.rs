pub mod context;
pub mod inquiry;
pub mod property;
pub mod reservation;
pub mod template;

pub use context::StructuredContext;
pub use inquiry::{stable_hash, Inquiry, PropertyId, ReservationId};
pub use property::{ContactInfo, ParkingType, Property, PropertyPolicies};
pub use reservation::{Reservation, RoomType};
pub use template::{CandidateTemplate, TemplateCategory, TemplateId};
