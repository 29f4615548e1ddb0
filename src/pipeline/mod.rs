//! The job lifecycle: accepting submissions, running conversions in response
//! to object events, and answering queries. Submission and worker never share
//! memory; the job record is their only channel.

pub mod cleanup;
pub mod dispatch;
pub mod query;
pub mod submit;
pub mod worker;
