mod crawl_tests;
