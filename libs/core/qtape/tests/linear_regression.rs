use qtape::{
    function::{mse_loss, Linear},
    get_global_tape,
    optim::{backward_and_update, Sgd},
    reset_global_tape, Place, Tensor, Variable, VariableHandle,
};

fn inputs() -> (VariableHandle, VariableHandle) {
    let x = Variable::from_tensor(
        "x",
        Tensor::new(vec![4, 3], vec![1., 0., 2., -1., 1., 0.5, 0., 2., -1., 3., -2., 1.]).unwrap(),
    );
    let target = Variable::from_tensor(
        "target",
        Tensor::new(vec![4, 2], vec![1., -1., 0.5, 2., -0.5, 0., 2., 1.]).unwrap(),
    );
    (x, target)
}

fn loss_value(layer: &Linear, x: &VariableHandle, target: &VariableHandle) -> f64 {
    reset_global_tape(Place::Cpu);
    let loss = mse_loss(&layer.forward(x).unwrap(), target).unwrap();
    let value = loss.value().unwrap().data()[0];
    value
}

#[test]
fn test_linear_gradients_populated() {
    let layer = Linear::new(3, 2, None, 1);
    let (x, target) = inputs();

    let tape = reset_global_tape(Place::Cpu);
    let loss = mse_loss(&layer.forward(&x).unwrap(), &target).unwrap();
    assert_eq!(tape.borrow().len(), 5);
    qtape::backward(&loss).unwrap();

    for param in layer.params() {
        let grad = param.grad();
        assert_eq!(grad.get().shape(), param.get().shape());
        assert!(grad.get().data().iter().all(|g| g.is_finite()));
        assert!(tape.borrow().has_gradient(&param));
    }
    assert!(tape.borrow().has_been_backwarded());
}

#[test]
fn test_sgd_step_decreases_loss() {
    let layer = Linear::new(3, 2, None, 2024);
    let (x, target) = inputs();
    let before = loss_value(&layer, &x, &target);

    reset_global_tape(Place::Cpu);
    let loss = mse_loss(&layer.forward(&x).unwrap(), &target).unwrap();
    backward_and_update(&loss, &mut Sgd::new(0.01), &layer.params()).unwrap();
    let after = loss_value(&layer, &x, &target);

    assert!(after < before, "{} should be less than {}", after, before);
    assert_eq!(get_global_tape().borrow().len(), 5);
}
