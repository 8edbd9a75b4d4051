//! Background scheduling

mod poller;

pub use poller::DeadlinePoller;
