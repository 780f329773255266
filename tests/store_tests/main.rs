//! Item store tests
