mod tests_canonical;
mod tests_write;
