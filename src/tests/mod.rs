mod lexical_migration;
mod web;
