mod retire_tests;
