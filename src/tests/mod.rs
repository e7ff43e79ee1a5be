mod runtime;
mod test_store;

mod test_common_validation;
mod test_counting_engine;
