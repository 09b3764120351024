/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Background expiry of stale sessions.
pub mod session_sweeper;
/// Participant session registry and room operations.
pub mod session_service;
/// Server-Sent Events streaming of session views.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
