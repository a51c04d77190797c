pub(crate) mod helpers;

mod tests_crud;
mod tests_find_search;
