mod tests_service;
