mod capsules;
mod users;
