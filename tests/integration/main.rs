//! Integration tests: full scan cycles, closing passes and cleanup against
//! an in-memory odds provider.

mod mock_provider;
mod scan_cycle;
