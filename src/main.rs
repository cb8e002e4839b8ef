fn main() {
    apiscribe::run();
}
