fn main() {
    pmap_harness_lib::run()
}
