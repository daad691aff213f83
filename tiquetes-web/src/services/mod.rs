//! Outbound clients, reply parsers and background work

pub mod authorization;
pub mod budget_parser;
pub mod classification;
pub mod classification_job;
pub mod granel_validation;
pub mod guia_pdf;
pub mod qr;
pub mod roboflow_client;
pub mod sap_comparison;
pub mod ticket_parser;
pub mod webhook_client;
pub mod weight_parser;
